// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像分类
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use yebing::{
  Classifier, ClassifierConfig, FromUrl,
  input::ImageFileInput,
  model::TractModelSource,
  output::OutputWrapper,
  task::{OneShotTask, Task},
};

/// Yebing 单张图像分类
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型，例如 onnx:///models/leaf.onnx?labels=/models/labels.txt
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 image:///data/leaf.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出方式
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,
  /// 输出前 K 个类别
  #[arg(long, value_name = "K", default_value_t = 5)]
  pub top_k: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出方式: {}", args.output);

  let input_image = ImageFileInput::from_url(&args.input)?;
  let runtime = TractModelSource::from_url(&args.model)?.into_runtime();
  let output = OutputWrapper::from_url(&args.output)?;

  let mut classifier = Classifier::new(runtime).with_config(ClassifierConfig {
    top_k: args.top_k,
    ..Default::default()
  });

  OneShotTask.run_task(input_image, &mut classifier, output)?;
  classifier.release();

  Ok(())
}
