// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/task.rs - 任务
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tracing::{info, warn};

use crate::{
  classifier::{Classifier, DiagnosticBundle},
  input::ImageBytes,
  model::ModelLoader,
  output::Render,
};

pub trait Task<I, C, O>: Sized {
  type Error;
  fn run_task(self, input: I, classifier: C, output: O) -> Result<(), Self::Error>;
}

/// 只分类第一张图像，失败时返回错误
pub struct OneShotTask;

impl<'a, L, RE, I, O> Task<I, &'a mut Classifier<L>, O> for OneShotTask
where
  L: ModelLoader,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = ImageBytes>,
  O: Render<ImageBytes, DiagnosticBundle, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, classifier: &'a mut Classifier<L>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let image = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像 {} 获取成功，开始分类...", image.name);
    let bundle = classifier.diagnose(&image.bytes);
    info!("分类结束，耗时: {:.2?}", bundle.elapsed);
    output.render_result(&image, &bundle)?;

    match bundle.error {
      Some(err) => Err(err.into()),
      None => Ok(()),
    }
  }
}

/// 反复分类同一张图像并统计平均耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { times: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_times(mut self, times: usize) -> Self {
    self.times = times.max(1);
    self
  }
}

/// 前两次包含模型加载与预热，次数足够时不计入平均值
pub fn mean_latency(times: &[Duration]) -> Option<Duration> {
  let steady = if times.len() > 2 { &times[2..] } else { times };
  let count = u32::try_from(steady.len()).ok().filter(|n| *n > 0)?;
  Some(steady.iter().sum::<Duration>() / count)
}

impl<'a, L, RE, I, O> Task<I, &'a mut Classifier<L>, O> for RepeatShotTask
where
  L: ModelLoader,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = ImageBytes>,
  O: Render<ImageBytes, DiagnosticBundle, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, classifier: &'a mut Classifier<L>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let image = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像 {} 获取成功，开始分类...", image.name);

    let mut times = Vec::with_capacity(self.times);
    let mut last = None;
    for i in 0..self.times {
      let bundle = classifier.diagnose(&image.bytes);
      if let Some(err) = bundle.error {
        return Err(err.into());
      }
      info!("({})分类完成，耗时: {:.2?}", i, bundle.elapsed);
      times.push(bundle.elapsed);
      last = Some(bundle);
    }

    if let Some(bundle) = last {
      output.render_result(&image, &bundle)?;
    }
    if let Some(mean) = mean_latency(&times) {
      warn!("平均分类时间: {:.2?}", mean);
    }

    Ok(())
  }
}

/// 依次分类所有输入，单张失败不会中断任务
#[derive(Default, Debug)]
pub struct ContinuousTask {
  limit: Option<usize>,
  interruptible: bool,
}

impl ContinuousTask {
  pub fn with_limit(mut self, limit: Option<usize>) -> Self {
    self.limit = limit;
    self
  }

  /// 安装 Ctrl-C 处理函数，收到信号后处理完当前图像即退出；每个进程只能安装一次
  pub fn interruptible(mut self, interruptible: bool) -> Self {
    self.interruptible = interruptible;
    self
  }
}

impl<'a, L, RE, I, O> Task<I, &'a mut Classifier<L>, O> for ContinuousTask
where
  L: ModelLoader,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = ImageBytes>,
  O: Render<ImageBytes, DiagnosticBundle, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, classifier: &'a mut Classifier<L>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let stop = Arc::new(AtomicBool::new(false));
    if self.interruptible {
      let stop = Arc::clone(&stop);
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        stop.store(true, Ordering::SeqCst);
      })?;
    }

    let mut processed = 0usize;
    let mut failed = 0usize;
    for image in input {
      if self.limit.is_some_and(|n| processed >= n) {
        info!("达到指定数量 {}, 退出任务循环", processed);
        break;
      }
      processed += 1;
      info!("处理第 {} 张图像: {}", processed, image.name);
      let bundle = classifier.diagnose(&image.bytes);
      if !bundle.is_ok() {
        failed += 1;
      }
      output.render_result(&image, &bundle)?;

      if stop.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成: 共 {} 张, 失败 {} 张", processed, failed);
    Ok(())
  }
}
