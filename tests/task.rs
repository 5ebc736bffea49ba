// 该文件是 Yebing （叶病识别） 项目的一部分。
// tests/task.rs - 任务集成测试
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

mod common;

use std::{
  convert::Infallible,
  sync::{Arc, Mutex},
};

use common::*;
use yebing::{
  DiagnosticBundle,
  input::ImageBytes,
  output::Render,
  task::{ContinuousTask, OneShotTask, RepeatShotTask, Task},
  tensor::ElementType,
};

const LABELS: &[&str] = &["Grape___Black_rot", "Grape___Esca", "Grape___healthy"];

/// 记录每次渲染的图像名与是否成功
#[derive(Clone, Default)]
struct Recorder {
  seen: Arc<Mutex<Vec<(String, bool)>>>,
}

impl Render<ImageBytes, DiagnosticBundle> for Recorder {
  type Error = Infallible;

  fn render_result(&self, input: &ImageBytes, result: &DiagnosticBundle) -> Result<(), Self::Error> {
    self
      .seen
      .lock()
      .unwrap()
      .push((input.name.clone(), result.is_ok()));
    Ok(())
  }
}

fn inputs() -> Vec<ImageBytes> {
  vec![
    ImageBytes::new("a.png", png_bytes(10, 10)),
    ImageBytes::new("broken.jpg", b"\xff\xd8 truncated".to_vec()),
    ImageBytes::new("c.jpg", jpeg_bytes(20, 12)),
  ]
}

#[test]
fn continuous_task_survives_bad_images() {
  let dir = tempfile::tempdir().unwrap();
  let loader = StubLoader::new(nhwc_spec(8, 8, 3, ElementType::U8), vec![0.2, 0.3, 0.5]);
  let mut classifier = classifier(loader, write_assets(dir.path(), LABELS));
  let recorder = Recorder::default();

  ContinuousTask::default()
    .run_task(inputs().into_iter(), &mut classifier, recorder.clone())
    .unwrap();

  let seen = recorder.seen.lock().unwrap().clone();
  assert_eq!(
    seen,
    vec![
      ("a.png".to_string(), true),
      ("broken.jpg".to_string(), false),
      ("c.jpg".to_string(), true),
    ]
  );
}

#[test]
fn continuous_task_honours_limit() {
  let dir = tempfile::tempdir().unwrap();
  let loader = StubLoader::new(nhwc_spec(8, 8, 3, ElementType::U8), vec![0.2, 0.3, 0.5]);
  let mut classifier = classifier(loader, write_assets(dir.path(), LABELS));
  let recorder = Recorder::default();

  ContinuousTask::default()
    .with_limit(Some(1))
    .run_task(inputs().into_iter(), &mut classifier, recorder.clone())
    .unwrap();

  assert_eq!(recorder.seen.lock().unwrap().len(), 1);
}

#[test]
fn one_shot_reports_failure() {
  let dir = tempfile::tempdir().unwrap();
  let loader = StubLoader::new(nhwc_spec(8, 8, 3, ElementType::U8), vec![0.2, 0.3, 0.5]);
  let mut classifier = classifier(loader, write_assets(dir.path(), LABELS));
  let recorder = Recorder::default();

  let broken = vec![ImageBytes::new("broken.jpg", b"nope".to_vec())];
  assert!(
    OneShotTask
      .run_task(broken.into_iter(), &mut classifier, recorder.clone())
      .is_err()
  );
  assert_eq!(recorder.seen.lock().unwrap().len(), 1);

  let empty: Vec<ImageBytes> = Vec::new();
  assert!(
    OneShotTask
      .run_task(empty.into_iter(), &mut classifier, recorder)
      .is_err()
  );
}

#[test]
fn repeat_shot_loads_once() {
  let dir = tempfile::tempdir().unwrap();
  let loader = StubLoader::new(nhwc_spec(8, 8, 3, ElementType::U8), vec![0.2, 0.3, 0.5]);
  let mut classifier = classifier(loader.clone(), write_assets(dir.path(), LABELS));
  let recorder = Recorder::default();

  RepeatShotTask::default()
    .with_times(5)
    .run_task(inputs().into_iter(), &mut classifier, recorder.clone())
    .unwrap();

  assert_eq!(loader.load_count(), 1);
  assert_eq!(recorder.seen.lock().unwrap().as_slice(), &[("a.png".to_string(), true)]);
}
