// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/model.rs - 模型
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

use std::path::Path;

use crate::{
  frame::RGB_CHANNELS,
  postprocess::OutputKind,
  tensor::{ElementType, InputTensor, TensorLayout},
};

/// 已加载模型声明的输入输出约定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
  /// 按 `layout` 排列的输入形状
  pub input_shape: [usize; 4],
  pub layout: TensorLayout,
  pub element_type: ElementType,
  /// `[batch, num_classes]`
  pub output_shape: [usize; 2],
  pub output_kind: OutputKind,
}

impl ModelSpec {
  /// 根据 3 通道维度所在位置推断布局；无法识别时返回 `None`
  pub fn from_dims(
    input_dims: &[usize],
    element_type: ElementType,
    output_dims: &[usize],
    output_kind: OutputKind,
  ) -> Option<Self> {
    let input_shape: [usize; 4] = input_dims.try_into().ok()?;
    let layout = if input_shape[3] == RGB_CHANNELS {
      TensorLayout::Nhwc
    } else if input_shape[1] == RGB_CHANNELS {
      TensorLayout::Nchw
    } else {
      return None;
    };

    // [1, N] 或 [N] 都视为单批次分类输出
    let output_shape = match output_dims {
      [n] => [1, *n],
      [b, n] => [*b, *n],
      _ => return None,
    };

    Some(Self {
      input_shape,
      layout,
      element_type,
      output_shape,
      output_kind,
    })
  }

  pub fn height(&self) -> usize {
    match self.layout {
      TensorLayout::Nhwc => self.input_shape[1],
      TensorLayout::Nchw => self.input_shape[2],
    }
  }

  pub fn width(&self) -> usize {
    match self.layout {
      TensorLayout::Nhwc => self.input_shape[2],
      TensorLayout::Nchw => self.input_shape[3],
    }
  }

  pub fn num_classes(&self) -> usize {
    self.output_shape[1]
  }

  pub fn input_len(&self) -> usize {
    self.input_shape.iter().product()
  }
}

/// 推理后端
pub trait Model {
  type Error: std::fmt::Display;

  fn spec(&self) -> &ModelSpec;

  /// 对单批次输入执行推理，返回原始输出
  fn infer(&self, input: &InputTensor) -> Result<Vec<f32>, Self::Error>;
}

/// 从模型文件创建推理后端
pub trait ModelLoader {
  type Model: Model;
  type Error: std::fmt::Display;

  fn load_model(&self, path: &Path) -> Result<Self::Model, Self::Error>;
}

mod labels;
pub use self::labels::{LabelError, LabelList};

mod runtime;
pub use self::runtime::{ModelAssets, ModelRuntime, RuntimeError};

#[cfg(feature = "model_tract")]
mod tract;
#[cfg(feature = "model_tract")]
pub use self::tract::{TractModel, TractModelBuilder, TractModelError, TractModelSource};
