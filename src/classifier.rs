// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/classifier.rs - 推理门面
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

//! # 推理门面
//!
//! [`Classifier`] 依次串联模型加载、解码缩放、张量构建、推理与后处理：
//!
//! ```text
//! NotLoaded -> Decoding -> TensorBuilding -> Running -> Postprocessing -> Done
//! ```
//!
//! 任一阶段失败都会终止本次调用，失败阶段与错误记录在 [`DiagnosticBundle`] 中。
//! 除模型加载外不做任何重试；加载失败后，下一次调用会重新尝试加载。
//!
//! [`AsyncClassifier`] 把同一个 [`Classifier`] 放到 tokio 的阻塞线程池中执行，
//! 调用方在加载与推理期间保持响应。

use std::{
  sync::{Arc, Mutex, PoisonError},
  time::{Duration, Instant},
};

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  input::{DecodeError, ImageDecoder},
  model::{ModelLoader, ModelRuntime, RuntimeError},
  postprocess::{Classification, OutputKind, Prediction, normalize, top_k, top1},
  tensor::{ElementType, TensorError, build_tensor},
};

const DEFAULT_TOP_K: usize = 5;
const DEFAULT_SIGNATURE_BYTES: usize = 16;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifyError {
  #[error("资源缺失: {0}")]
  AssetMissing(String),
  #[error("模型加载失败: {0}")]
  ModelLoad(String),
  #[error("图像解码失败: {0}")]
  DecodeFailure(#[from] DecodeError),
  #[error("预处理失败: {0}")]
  PreprocessFailure(String),
  #[error("模型尚未加载")]
  RuntimeNotReady,
  #[error("推理失败: {0}")]
  InferenceFailure(String),
}

impl ClassifyError {
  pub fn kind(&self) -> &'static str {
    match self {
      ClassifyError::AssetMissing(_) => "asset_missing",
      ClassifyError::ModelLoad(_) => "model_load",
      ClassifyError::DecodeFailure(_) => "decode_failure",
      ClassifyError::PreprocessFailure(_) => "preprocess_failure",
      ClassifyError::RuntimeNotReady => "runtime_not_ready",
      ClassifyError::InferenceFailure(_) => "inference_failure",
    }
  }
}

impl From<RuntimeError> for ClassifyError {
  fn from(err: RuntimeError) -> Self {
    match err {
      RuntimeError::AssetMissing(msg) => ClassifyError::AssetMissing(msg),
      RuntimeError::ModelInvalid(msg) => ClassifyError::ModelLoad(msg),
      RuntimeError::NotReady => ClassifyError::RuntimeNotReady,
      RuntimeError::InputMismatch(msg) => ClassifyError::PreprocessFailure(msg),
      RuntimeError::InferenceFailure(msg) => ClassifyError::InferenceFailure(msg),
    }
  }
}

impl From<TensorError> for ClassifyError {
  fn from(err: TensorError) -> Self {
    ClassifyError::PreprocessFailure(err.to_string())
  }
}

/// 单次调用到达的最后阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
  NotLoaded,
  Decoding,
  TensorBuilding,
  Running,
  Postprocessing,
  Done,
}

impl Stage {
  pub fn as_str(&self) -> &'static str {
    match self {
      Stage::NotLoaded => "not_loaded",
      Stage::Decoding => "decoding",
      Stage::TensorBuilding => "tensor_building",
      Stage::Running => "running",
      Stage::Postprocessing => "postprocessing",
      Stage::Done => "done",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierConfig {
  pub top_k: usize,
  /// 内容签名取输入的前若干字节
  pub signature_bytes: usize,
}

impl Default for ClassifierConfig {
  fn default() -> Self {
    Self {
      top_k: DEFAULT_TOP_K,
      signature_bytes: DEFAULT_SIGNATURE_BYTES,
    }
  }
}

/// 输入前 `n` 个字节的十六进制编码，用于关联日志与结果，不是安全指纹
pub fn content_signature(bytes: &[u8], n: usize) -> String {
  bytes
    .iter()
    .take(n)
    .map(|b| format!("{:02x}", b))
    .collect()
}

/// 单次分类的完整诊断信息
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticBundle {
  pub stage: Stage,
  pub signature: String,
  pub input_bytes: usize,
  pub input_type: Option<ElementType>,
  pub input_shape: Option<[usize; 4]>,
  pub output_shape: Option<[usize; 2]>,
  pub output_kind: Option<OutputKind>,
  pub raw_output: Vec<f32>,
  pub probabilities: Vec<f32>,
  pub top: Classification,
  pub labels: Vec<String>,
  pub elapsed: Duration,
  pub error: Option<ClassifyError>,
}

impl DiagnosticBundle {
  pub(crate) fn new(bytes: &[u8], signature_bytes: usize) -> Self {
    Self {
      stage: Stage::NotLoaded,
      signature: content_signature(bytes, signature_bytes),
      input_bytes: bytes.len(),
      input_type: None,
      input_shape: None,
      output_shape: None,
      output_kind: None,
      raw_output: Vec::new(),
      probabilities: Vec::new(),
      top: Classification::default(),
      labels: Vec::new(),
      elapsed: Duration::ZERO,
      error: None,
    }
  }

  pub fn is_ok(&self) -> bool {
    self.error.is_none()
  }

  pub fn top1(&self) -> Option<&Prediction> {
    self.top.top1()
  }

  pub fn into_classification(self) -> Result<Classification, ClassifyError> {
    match self.error {
      Some(err) => Err(err),
      None => Ok(self.top),
    }
  }

  /// 转为只含基本类型的嵌套映射，供界面层直接渲染
  pub fn to_json(&self) -> Value {
    let top: Vec<Value> = self
      .top
      .iter()
      .map(|p| json!({ "index": p.index, "label": p.label, "score": p.score }))
      .collect();

    json!({
      "ok": self.is_ok(),
      "stage": self.stage.as_str(),
      "signature": self.signature,
      "input_bytes": self.input_bytes,
      "input_type": self.input_type.map(|t| t.as_str()),
      "input_shape": self.input_shape,
      "output_shape": self.output_shape,
      "output_kind": self.output_kind.map(|k| k.as_str()),
      "raw_output": self.raw_output,
      "probabilities": self.probabilities,
      "top": top,
      "labels": self.labels,
      "elapsed_ms": self.elapsed.as_secs_f64() * 1000.0,
      "error": self.error.as_ref().map(|e| json!({ "kind": e.kind(), "message": e.to_string() })),
    })
  }
}

/// 同步推理门面，独占一个模型运行时
pub struct Classifier<L: ModelLoader> {
  runtime: ModelRuntime<L>,
  decoder: ImageDecoder,
  config: ClassifierConfig,
}

impl<L: ModelLoader> Classifier<L> {
  pub fn new(runtime: ModelRuntime<L>) -> Self {
    Self {
      runtime,
      decoder: ImageDecoder::default(),
      config: ClassifierConfig::default(),
    }
  }

  pub fn with_config(mut self, config: ClassifierConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_decoder(mut self, decoder: ImageDecoder) -> Self {
    self.decoder = decoder;
    self
  }

  pub fn config(&self) -> &ClassifierConfig {
    &self.config
  }

  pub fn runtime(&self) -> &ModelRuntime<L> {
    &self.runtime
  }

  pub fn is_ready(&self) -> bool {
    self.runtime.is_ready()
  }

  pub fn load(&mut self) -> Result<(), ClassifyError> {
    self.runtime.load().map_err(ClassifyError::from)
  }

  pub fn release(&mut self) {
    self.runtime.release();
  }

  /// 执行一次完整分类，总是返回诊断信息
  pub fn diagnose(&mut self, bytes: &[u8]) -> DiagnosticBundle {
    let started = Instant::now();
    let mut bundle = DiagnosticBundle::new(bytes, self.config.signature_bytes);

    if let Err(err) = self.run_stages(bytes, &mut bundle) {
      warn!(
        "分类失败 [{}] 阶段 {}: {}",
        bundle.signature,
        bundle.stage.as_str(),
        err
      );
      bundle.error = Some(err);
    }
    bundle.elapsed = started.elapsed();

    if let Some(best) = bundle.top1() {
      info!(
        "分类完成 [{}]: {} ({:.2}%), 耗时 {:.2?}",
        bundle.signature,
        best.label,
        best.score * 100.0,
        bundle.elapsed
      );
    }
    bundle
  }

  pub fn classify(&mut self, bytes: &[u8]) -> Result<Classification, ClassifyError> {
    self.diagnose(bytes).into_classification()
  }

  /// 只返回最可能的类别
  pub fn classify_top1(&mut self, bytes: &[u8]) -> Result<Prediction, ClassifyError> {
    let bundle = self.diagnose(bytes);
    if let Some(err) = bundle.error {
      return Err(err);
    }
    top1(&bundle.probabilities, &bundle.labels)
      .ok_or_else(|| ClassifyError::InferenceFailure("模型输出为空".to_string()))
  }

  fn run_stages(&mut self, bytes: &[u8], bundle: &mut DiagnosticBundle) -> Result<(), ClassifyError> {
    if !self.runtime.is_ready() {
      info!("模型未就绪，开始加载");
      self.runtime.load()?;
    }

    let spec = self
      .runtime
      .spec()
      .cloned()
      .ok_or(ClassifyError::RuntimeNotReady)?;
    let labels = self
      .runtime
      .labels()
      .map(|l| l.as_slice().to_vec())
      .unwrap_or_default();

    bundle.input_type = Some(spec.element_type);
    bundle.input_shape = Some(spec.input_shape);
    bundle.output_shape = Some(spec.output_shape);
    bundle.output_kind = Some(spec.output_kind);
    bundle.labels = labels;

    bundle.stage = Stage::Decoding;
    let (width, height) = match (u32::try_from(spec.width()), u32::try_from(spec.height())) {
      (Ok(w), Ok(h)) => (w, h),
      _ => {
        return Err(ClassifyError::PreprocessFailure(format!(
          "模型输入尺寸过大: {}x{}",
          spec.width(),
          spec.height()
        )));
      }
    };
    let frame = self.decoder.decode(bytes, width, height)?;

    bundle.stage = Stage::TensorBuilding;
    let tensor = build_tensor(
      &frame,
      spec.height(),
      spec.width(),
      spec.element_type,
      spec.layout,
    )?;
    debug!("输入张量: {:?} {}", tensor.shape(), tensor.element_type());

    bundle.stage = Stage::Running;
    let now = Instant::now();
    let raw = self.runtime.classify(&tensor)?;
    debug!("推理完成，耗时: {:.2?}", now.elapsed());

    bundle.stage = Stage::Postprocessing;
    let probabilities = normalize(&raw, spec.output_kind);
    bundle.top = top_k(&probabilities, &bundle.labels, self.config.top_k);
    bundle.raw_output = raw;
    bundle.probabilities = probabilities;

    bundle.stage = Stage::Done;
    Ok(())
  }

  pub fn into_async(self) -> AsyncClassifier<L> {
    AsyncClassifier::new(self)
  }
}

/// 异步推理门面，所有调用都在阻塞线程池中串行执行
pub struct AsyncClassifier<L: ModelLoader> {
  inner: Arc<Mutex<Classifier<L>>>,
  signature_bytes: usize,
}

impl<L: ModelLoader> Clone for AsyncClassifier<L> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
      signature_bytes: self.signature_bytes,
    }
  }
}

impl<L: ModelLoader> AsyncClassifier<L> {
  pub fn new(classifier: Classifier<L>) -> Self {
    Self {
      signature_bytes: classifier.config().signature_bytes,
      inner: Arc::new(Mutex::new(classifier)),
    }
  }
}

impl<L> AsyncClassifier<L>
where
  L: ModelLoader + Send + 'static,
  L::Model: Send + 'static,
{
  async fn with_classifier<R, F>(&self, f: F) -> Result<R, ClassifyError>
  where
    R: Send + 'static,
    F: FnOnce(&mut Classifier<L>) -> R + Send + 'static,
  {
    let inner = Arc::clone(&self.inner);
    tokio::task::spawn_blocking(move || {
      // 每次调用都会重建自己的缓冲区，锁中毒后的状态仍可继续使用
      let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
      f(&mut guard)
    })
    .await
    .map_err(|e| ClassifyError::InferenceFailure(format!("任务异常: {}", e)))
  }

  pub async fn is_ready(&self) -> bool {
    self
      .with_classifier(|c| c.is_ready())
      .await
      .unwrap_or(false)
  }

  pub async fn load(&self) -> Result<(), ClassifyError> {
    self.with_classifier(|c| c.load()).await?
  }

  pub async fn release(&self) {
    if let Err(e) = self.with_classifier(|c| c.release()).await {
      warn!("释放模型失败: {}", e);
    }
  }

  pub async fn last_load_error(&self) -> Option<String> {
    self
      .with_classifier(|c| c.runtime().last_load_error().map(str::to_string))
      .await
      .ok()
      .flatten()
  }

  pub async fn classify(&self, bytes: Vec<u8>) -> Result<Classification, ClassifyError> {
    self.with_classifier(move |c| c.classify(&bytes)).await?
  }

  pub async fn diagnose(&self, bytes: Vec<u8>) -> DiagnosticBundle {
    let fallback = DiagnosticBundle::new(&bytes, self.signature_bytes);
    match self.with_classifier(move |c| c.diagnose(&bytes)).await {
      Ok(bundle) => bundle,
      Err(err) => DiagnosticBundle {
        error: Some(err),
        ..fallback
      },
    }
  }
}
