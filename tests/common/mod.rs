// 该文件是 Yebing （叶病识别） 项目的一部分。
// tests/common/mod.rs - 集成测试公用桩模型与样例图像
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

#![allow(dead_code)]

use std::{
  io::Cursor,
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use image::{ImageFormat, Rgb, RgbImage};
use yebing::{
  Classifier,
  model::{Model, ModelAssets, ModelLoader, ModelRuntime, ModelSpec},
  postprocess::OutputKind,
  tensor::{ElementType, InputTensor},
};

pub const STUB_MODEL_BYTES: &[u8] = b"yebing-stub-model";

pub struct StubModel {
  spec: ModelSpec,
  output: Vec<f32>,
}

impl Model for StubModel {
  type Error = String;

  fn spec(&self) -> &ModelSpec {
    &self.spec
  }

  fn infer(&self, input: &InputTensor) -> Result<Vec<f32>, Self::Error> {
    if input.len() != self.spec.input_len() {
      return Err(format!("unexpected input length {}", input.len()));
    }
    Ok(self.output.clone())
  }
}

/// 只接受内容为 [`STUB_MODEL_BYTES`] 的模型文件，每次推理返回固定输出
#[derive(Clone)]
pub struct StubLoader {
  pub spec: ModelSpec,
  pub output: Vec<f32>,
  pub loads: Arc<AtomicUsize>,
}

impl StubLoader {
  pub fn new(spec: ModelSpec, output: Vec<f32>) -> Self {
    Self {
      spec,
      output,
      loads: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn load_count(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }
}

impl ModelLoader for StubLoader {
  type Model = StubModel;
  type Error = String;

  fn load_model(&self, path: &Path) -> Result<Self::Model, Self::Error> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    if bytes != STUB_MODEL_BYTES {
      return Err("not a model file".to_string());
    }
    self.loads.fetch_add(1, Ordering::SeqCst);
    Ok(StubModel {
      spec: self.spec.clone(),
      output: self.output.clone(),
    })
  }
}

pub fn nhwc_spec(height: usize, width: usize, classes: usize, element_type: ElementType) -> ModelSpec {
  ModelSpec::from_dims(
    &[1, height, width, 3],
    element_type,
    &[1, classes],
    OutputKind::Auto,
  )
  .unwrap()
}

/// 在目录中写入模型与标签文件
pub fn write_assets(dir: &Path, labels: &[&str]) -> ModelAssets {
  let model = dir.join("leaf.onnx");
  let label_path = dir.join("labels.txt");
  std::fs::write(&model, STUB_MODEL_BYTES).unwrap();
  std::fs::write(&label_path, labels.join("\n")).unwrap();
  ModelAssets::new(model, label_path)
}

pub fn missing_assets(dir: &Path) -> ModelAssets {
  ModelAssets::new(dir.join("leaf.onnx"), dir.join("labels.txt"))
}

pub fn classifier(loader: StubLoader, assets: ModelAssets) -> Classifier<StubLoader> {
  Classifier::new(ModelRuntime::new(loader, assets))
}

fn leaf_image(width: u32, height: u32) -> RgbImage {
  RgbImage::from_fn(width, height, |x, y| {
    Rgb([(x * 7 % 256) as u8, 120 + (y % 100) as u8, ((x + y) % 64) as u8])
  })
}

pub fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
  let mut out = Cursor::new(Vec::new());
  leaf_image(width, height).write_to(&mut out, format).unwrap();
  out.into_inner()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
  encode(width, height, ImageFormat::Png)
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
  encode(width, height, ImageFormat::Jpeg)
}
