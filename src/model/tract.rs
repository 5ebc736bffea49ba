// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/model/tract.rs - 基于 tract 的 ONNX 推理后端
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use tract_onnx::prelude::*;
use tract_onnx::tract_core::ops::nn::Softmax;
use tract_onnx::tract_hir::internal::{DimLike, Factoid};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Model, ModelAssets, ModelLoader, ModelRuntime, ModelSpec},
  postprocess::OutputKind,
  tensor::{ElementType, InputTensor, TensorData},
};

const DEFAULT_LABELS_FILE: &str = "labels.txt";

type TractPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

pub struct TractModel {
  plan: TractPlan,
  spec: ModelSpec,
}

#[derive(Error, Debug)]
pub enum TractModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("Tract 错误: {0:#}")]
  TractError(#[from] anyhow::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

/// tract 模型加载配置
///
/// 未指定输入时使用模型文件中声明的输入，动态批次维固定为 1。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TractModelBuilder {
  input: Option<(ElementType, Vec<usize>)>,
  output_kind: OutputKind,
}

impl TractModelBuilder {
  pub fn input(mut self, element_type: ElementType, shape: Vec<usize>) -> Self {
    self.input = Some((element_type, shape));
    self
  }

  pub fn output_kind(mut self, output_kind: OutputKind) -> Self {
    self.output_kind = output_kind;
    self
  }

  pub fn build(&self, path: &Path) -> Result<TractModel, TractModelError> {
    let size = std::fs::metadata(path)?.len();
    debug!("模型文件大小: {:.2} MB", size as f64 / (1024.0 * 1024.0));

    let model = tract_onnx::onnx().model_for_path(path)?;
    let (element_type, input_dims) = match &self.input {
      Some((element_type, dims)) => (*element_type, dims.clone()),
      None => declared_input(&model)?,
    };
    debug!("模型输入: {:?} {}", input_dims, element_type);

    let fact: InferenceFact = match element_type {
      ElementType::U8 => u8::fact(input_dims.clone()).into(),
      ElementType::F32 => f32::fact(input_dims.clone()).into(),
    };

    info!("优化 tract 推理计划");
    let model = model.with_input_fact(0, fact)?.into_optimized()?;

    let output_dims = model
      .output_fact(0)?
      .shape
      .as_concrete()
      .ok_or_else(|| TractModelError::ModelInvalid("输出形状不确定".to_string()))?
      .to_vec();
    debug!("模型输出: {:?}", output_dims);

    let output_kind = match self.output_kind {
      OutputKind::Auto if ends_with_softmax(&model)? => {
        debug!("模型以 Softmax 结尾，输出视为概率");
        OutputKind::Probabilities
      }
      kind => kind,
    };

    let spec = ModelSpec::from_dims(&input_dims, element_type, &output_dims, output_kind)
      .ok_or_else(|| {
        TractModelError::ModelInvalid(format!(
          "不支持的输入输出形状: 输入 {:?}, 输出 {:?}",
          input_dims, output_dims
        ))
      })?;

    let plan = model.into_runnable()?;
    Ok(TractModel { plan, spec })
  }
}

impl ModelLoader for TractModelBuilder {
  type Model = TractModel;
  type Error = TractModelError;

  fn load_model(&self, path: &Path) -> Result<Self::Model, Self::Error> {
    self.build(path)
  }
}

/// 读取模型文件中声明的第一个输入
fn declared_input(model: &InferenceModel) -> Result<(ElementType, Vec<usize>), TractModelError> {
  let fact = model.input_fact(0)?;

  let element_type = match fact.datum_type.concretize() {
    Some(DatumType::U8) | Some(DatumType::QU8(_)) => ElementType::U8,
    Some(DatumType::F32) => ElementType::F32,
    other => {
      return Err(TractModelError::ModelInvalid(format!(
        "不支持的输入类型: {:?}",
        other
      )));
    }
  };

  if fact.shape.is_open() {
    return Err(TractModelError::ModelInvalid("输入秩不确定".to_string()));
  }

  let dims = fact
    .shape
    .dims()
    .enumerate()
    .map(|(axis, dim)| match dim.concretize().and_then(|d| d.to_usize().ok()) {
      Some(value) => Ok(value),
      None if axis == 0 => Ok(1),
      None => Err(TractModelError::ModelInvalid(format!(
        "输入第 {} 维不确定: {:?}",
        axis, dim
      ))),
    })
    .collect::<Result<Vec<_>, _>>()?;

  Ok((element_type, dims))
}

fn ends_with_softmax(model: &TypedModel) -> Result<bool, TractModelError> {
  let outlet = model.output_outlets()?[0];
  Ok(model.node(outlet.node).op_is::<Softmax>())
}

impl Model for TractModel {
  type Error = TractModelError;

  fn spec(&self) -> &ModelSpec {
    &self.spec
  }

  fn infer(&self, input: &InputTensor) -> Result<Vec<f32>, Self::Error> {
    let shape = input.shape();
    let tensor = match input.data() {
      TensorData::U8(data) => Tensor::from_shape(&shape, &data[..])?,
      TensorData::F32(data) => Tensor::from_shape(&shape, &data[..])?,
    };

    debug!("执行模型推理");
    let outputs = self.plan.run(tvec!(tensor.into()))?;
    let output = outputs
      .first()
      .ok_or_else(|| TractModelError::ModelInvalid("模型没有输出".to_string()))?
      .cast_to::<f32>()?;

    Ok(output.as_slice::<f32>()?.to_vec())
  }
}

/// 由 URL 描述的模型来源：模型文件、备用路径、标签文件与加载配置
///
/// `onnx:///models/leaf.onnx?fallback=/opt/leaf.onnx&labels=/models/labels.txt&output=logits&input=1x224x224x3&dtype=u8`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TractModelSource {
  pub assets: ModelAssets,
  pub builder: TractModelBuilder,
}

impl FromUrlWithScheme for TractModelSource {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for TractModelSource {
  type Error = TractModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TractModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_path = PathBuf::from(url.path());
    let mut labels = model_path
      .parent()
      .map(|dir| dir.join(DEFAULT_LABELS_FILE))
      .unwrap_or_else(|| PathBuf::from(DEFAULT_LABELS_FILE));
    let mut fallbacks = Vec::new();
    let mut builder = TractModelBuilder::default();
    let mut input_dims = None;
    let mut element_type = ElementType::F32;

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "labels" => labels = PathBuf::from(value.as_ref()),
        "fallback" => fallbacks.push(PathBuf::from(value.as_ref())),
        "output" => {
          builder = builder.output_kind(value.parse().map_err(TractModelError::ModelPathError)?)
        }
        "dtype" => {
          element_type = value
            .parse()
            .map_err(|e: crate::tensor::TensorError| TractModelError::ModelPathError(e.to_string()))?
        }
        "input" => input_dims = Some(parse_dims(&value)?),
        other => debug!("忽略未知的模型参数: {}", other),
      }
    }

    if let Some(dims) = input_dims {
      builder = builder.input(element_type, dims);
    }

    let mut assets = ModelAssets::new(model_path, labels);
    for fallback in fallbacks {
      assets = assets.with_fallback(fallback);
    }

    Ok(Self { assets, builder })
  }
}

impl TractModelSource {
  pub fn into_runtime(self) -> ModelRuntime<TractModelBuilder> {
    ModelRuntime::new(self.builder, self.assets)
  }
}

fn parse_dims(text: &str) -> Result<Vec<usize>, TractModelError> {
  text
    .split(['x', 'X', ','])
    .map(|d| {
      d.trim()
        .parse::<usize>()
        .map_err(|_| TractModelError::ModelPathError(format!("无效的输入形状: {}", text)))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::RgbNhwcFrame,
    tensor::{TensorLayout, build_tensor},
  };

  fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
      .join("tests/fixtures")
      .join(name)
  }

  fn leaf_tensor(spec: &ModelSpec) -> InputTensor {
    let mut frame = RgbNhwcFrame::with_shape(spec.height(), spec.width());
    for (i, v) in frame.as_mut().iter_mut().enumerate() {
      *v = (i * 17 % 256) as u8;
    }
    build_tensor(
      &frame,
      spec.height(),
      spec.width(),
      spec.element_type,
      spec.layout,
    )
    .unwrap()
  }

  #[test]
  fn softmax_graph_declares_probabilities() {
    let model = TractModelBuilder::default()
      .build(&fixture("leaf_softmax.onnx"))
      .unwrap();
    let spec = model.spec().clone();
    assert_eq!(spec.input_shape, [1, 4, 4, 3]);
    assert_eq!(spec.layout, TensorLayout::Nhwc);
    assert_eq!(spec.element_type, ElementType::F32);
    assert_eq!(spec.output_kind, OutputKind::Probabilities);
    assert_eq!(spec.num_classes(), 3);

    let scores = model.infer(&leaf_tensor(&spec)).unwrap();
    assert_eq!(scores.len(), 3);
    assert!((scores.iter().sum::<f32>() - 1.0).abs() < 1e-4);
  }

  #[test]
  fn graph_without_softmax_stays_auto() {
    let model = TractModelBuilder::default()
      .build(&fixture("leaf_logits.onnx"))
      .unwrap();
    let spec = model.spec().clone();
    assert_eq!(spec.input_shape, [1, 4, 4, 3]);
    assert_eq!(spec.output_kind, OutputKind::Auto);

    let scores = model.infer(&leaf_tensor(&spec)).unwrap();
    assert_eq!(scores.len(), 3);
    assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
  }

  #[test]
  fn explicit_output_kind_wins_over_graph() {
    let model = TractModelBuilder::default()
      .output_kind(OutputKind::Logits)
      .build(&fixture("leaf_softmax.onnx"))
      .unwrap();
    assert_eq!(model.spec().output_kind, OutputKind::Logits);
  }

  #[test]
  fn explicit_input_replaces_dynamic_batch() {
    let model = TractModelBuilder::default()
      .input(ElementType::F32, vec![1, 4, 4, 3])
      .build(&fixture("leaf_logits.onnx"))
      .unwrap();
    assert_eq!(model.spec().input_shape, [1, 4, 4, 3]);
  }

  #[test]
  fn parses_full_model_url() {
    let url = Url::parse(
      "onnx:///models/leaf.onnx?fallback=/opt/leaf.onnx&labels=/etc/leaf.txt&output=logits&input=1x224x224x3&dtype=u8",
    )
    .unwrap();
    let source = TractModelSource::from_url(&url).unwrap();

    assert_eq!(
      source.assets.model_candidates,
      vec![PathBuf::from("/models/leaf.onnx"), PathBuf::from("/opt/leaf.onnx")]
    );
    assert_eq!(source.assets.labels, PathBuf::from("/etc/leaf.txt"));
    assert_eq!(
      source.builder,
      TractModelBuilder::default()
        .output_kind(OutputKind::Logits)
        .input(ElementType::U8, vec![1, 224, 224, 3])
    );
  }

  #[test]
  fn labels_default_next_to_model() {
    let url = Url::parse("onnx:///models/leaf.onnx").unwrap();
    let source = TractModelSource::from_url(&url).unwrap();
    assert_eq!(source.assets.labels, PathBuf::from("/models/labels.txt"));
    assert_eq!(source.builder, TractModelBuilder::default());
  }

  #[test]
  fn rejects_bad_urls() {
    let wrong_scheme = Url::parse("file:///models/leaf.onnx").unwrap();
    assert!(TractModelSource::from_url(&wrong_scheme).is_err());

    let bad_dims = Url::parse("onnx:///m.onnx?input=1xAx3").unwrap();
    assert!(TractModelSource::from_url(&bad_dims).is_err());
  }

  #[test]
  fn missing_model_file_fails_to_load() {
    let url = Url::parse("onnx:///definitely/missing/leaf.onnx").unwrap();
    let mut runtime = TractModelSource::from_url(&url).unwrap().into_runtime();
    assert!(matches!(
      runtime.load(),
      Err(crate::model::RuntimeError::AssetMissing(_))
    ));
    assert!(runtime.last_load_error().is_some());
  }
}
