// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/model/runtime.rs - 模型运行时
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

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  model::{LabelList, Model, ModelLoader, ModelSpec},
  tensor::InputTensor,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
  #[error("资源缺失: {0}")]
  AssetMissing(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型尚未加载")]
  NotReady,
  #[error("输入张量与模型不符: {0}")]
  InputMismatch(String),
  #[error("推理失败: {0}")]
  InferenceFailure(String),
}

/// 模型文件与标签文件的位置
///
/// 模型文件按 `model_candidates` 顺序查找，第一个能加载的生效。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAssets {
  pub model_candidates: Vec<PathBuf>,
  pub labels: PathBuf,
}

impl ModelAssets {
  pub fn new(model: impl Into<PathBuf>, labels: impl Into<PathBuf>) -> Self {
    Self {
      model_candidates: vec![model.into()],
      labels: labels.into(),
    }
  }

  pub fn with_fallback(mut self, model: impl Into<PathBuf>) -> Self {
    self.model_candidates.push(model.into());
    self
  }
}

struct LoadedModel<M> {
  model: M,
  labels: LabelList,
}

/// 持有唯一的模型句柄与标签表
pub struct ModelRuntime<L: ModelLoader> {
  loader: L,
  assets: ModelAssets,
  loaded: Option<LoadedModel<L::Model>>,
  last_load_error: Option<String>,
}

impl<L: ModelLoader> ModelRuntime<L> {
  pub fn new(loader: L, assets: ModelAssets) -> Self {
    Self {
      loader,
      assets,
      loaded: None,
      last_load_error: None,
    }
  }

  pub fn assets(&self) -> &ModelAssets {
    &self.assets
  }

  pub fn is_ready(&self) -> bool {
    self.loaded.is_some()
  }

  pub fn spec(&self) -> Option<&ModelSpec> {
    self.loaded.as_ref().map(|l| l.model.spec())
  }

  pub fn labels(&self) -> Option<&LabelList> {
    self.loaded.as_ref().map(|l| &l.labels)
  }

  /// 最近一次加载失败的信息；最近一次加载成功时为 `None`
  pub fn last_load_error(&self) -> Option<&str> {
    self.last_load_error.as_deref()
  }

  /// 加载模型与标签；重复调用会重新执行全部步骤
  pub fn load(&mut self) -> Result<(), RuntimeError> {
    self.loaded = None;

    match self.try_load() {
      Ok(loaded) => {
        let spec = loaded.model.spec();
        info!(
          "模型加载完成: 输入 {:?} ({}, {}), 输出 {:?}, 标签 {} 个",
          spec.input_shape,
          spec.element_type,
          spec.layout.as_str(),
          spec.output_shape,
          loaded.labels.len()
        );
        self.loaded = Some(loaded);
        self.last_load_error = None;
        Ok(())
      }
      Err(e) => {
        error!("模型加载失败: {}", e);
        self.last_load_error = Some(e.to_string());
        Err(e)
      }
    }
  }

  fn try_load(&self) -> Result<LoadedModel<L::Model>, RuntimeError> {
    if self.assets.model_candidates.is_empty() {
      return Err(RuntimeError::AssetMissing("未配置模型路径".to_string()));
    }

    let mut failures = Vec::with_capacity(self.assets.model_candidates.len());
    let mut any_present = false;
    let mut model = None;

    for path in &self.assets.model_candidates {
      if !path.is_file() {
        debug!("模型文件不存在: {}", path.display());
        failures.push(format!("{}: 文件不存在", path.display()));
        continue;
      }

      any_present = true;
      info!("加载模型文件: {}", path.display());
      match self.loader.load_model(path) {
        Ok(m) => {
          model = Some(m);
          break;
        }
        Err(e) => {
          warn!("模型文件 {} 加载失败: {}", path.display(), e);
          failures.push(format!("{}: {}", path.display(), e));
        }
      }
    }

    let Some(model) = model else {
      let message = failures.join("; ");
      return Err(if any_present {
        RuntimeError::ModelInvalid(message)
      } else {
        RuntimeError::AssetMissing(message)
      });
    };

    let labels =
      LabelList::load(&self.assets.labels).map_err(|e| RuntimeError::AssetMissing(e.to_string()))?;

    let num_classes = model.spec().num_classes();
    if labels.len() != num_classes {
      warn!(
        "标签数量 {} 与模型类别数 {} 不一致，缺失的标签将以 class_<索引> 代替",
        labels.len(),
        num_classes
      );
    }

    Ok(LoadedModel { model, labels })
  }

  /// 对单批次张量执行推理，输出长度必须等于 `num_classes`
  pub fn classify(&self, tensor: &InputTensor) -> Result<Vec<f32>, RuntimeError> {
    let loaded = self.loaded.as_ref().ok_or(RuntimeError::NotReady)?;
    let spec = loaded.model.spec();

    if tensor.shape() != spec.input_shape || tensor.element_type() != spec.element_type {
      return Err(RuntimeError::InputMismatch(format!(
        "期望 {:?} {}, 实际 {:?} {}",
        spec.input_shape,
        spec.element_type,
        tensor.shape(),
        tensor.element_type()
      )));
    }

    let raw = loaded
      .model
      .infer(tensor)
      .map_err(|e| RuntimeError::InferenceFailure(e.to_string()))?;

    if raw.len() != spec.num_classes() {
      return Err(RuntimeError::InferenceFailure(format!(
        "输出长度不匹配: 期望 {}, 实际 {}",
        spec.num_classes(),
        raw.len()
      )));
    }
    Ok(raw)
  }

  /// 释放模型资源，可重复调用
  pub fn release(&mut self) {
    if self.loaded.take().is_some() {
      info!("模型已释放");
    }
  }
}
