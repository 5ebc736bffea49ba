// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理基准测试
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
  Classifier, FromUrl,
  input::ImageFileInput,
  model::TractModelSource,
  output::LogOutput,
  task::{RepeatShotTask, Task},
};

/// Yebing 推理耗时基准
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，只使用第一张图像
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 重复次数
  #[arg(long, value_name = "TIMES", default_value_t = 1000)]
  pub times: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);

  let input_image = ImageFileInput::from_url(&args.input)?;
  let runtime = TractModelSource::from_url(&args.model)?.into_runtime();
  let mut classifier = Classifier::new(runtime);

  RepeatShotTask::default()
    .with_times(args.times)
    .run_task(input_image, &mut classifier, LogOutput::default())?;

  Ok(())
}
