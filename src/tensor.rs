// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/tensor.rs - 输入张量构建
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

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::frame::{AsNchwFrame, AsNhwcFrame, RGB_CHANNELS, RgbNchwFrame, RgbNhwcFrame};

/// 模型声明的输入元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
  U8,
  F32,
}

impl ElementType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ElementType::U8 => "uint8",
      ElementType::F32 => "float32",
    }
  }
}

impl fmt::Display for ElementType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ElementType {
  type Err = TensorError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "u8" | "uint8" => Ok(ElementType::U8),
      "f32" | "float32" | "float" => Ok(ElementType::F32),
      other => Err(TensorError::UnknownElementType(other.to_string())),
    }
  }
}

/// 输入张量的维度顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TensorLayout {
  #[default]
  Nhwc,
  Nchw,
}

impl TensorLayout {
  pub fn as_str(&self) -> &'static str {
    match self {
      TensorLayout::Nhwc => "NHWC",
      TensorLayout::Nchw => "NCHW",
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
  #[error("帧尺寸与模型不符: 期望 {expected_h}x{expected_w}, 实际 {actual_h}x{actual_w}")]
  ShapeMismatch {
    expected_h: usize,
    expected_w: usize,
    actual_h: usize,
    actual_w: usize,
  },
  #[error("未知的元素类型: {0}")]
  UnknownElementType(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  U8(Box<[u8]>),
  F32(Box<[f32]>),
}

/// 单张图像的输入张量，形状为 `[1, H, W, 3]` 或 `[1, 3, H, W]`
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  shape: [usize; 4],
  layout: TensorLayout,
  data: TensorData,
}

impl InputTensor {
  pub fn shape(&self) -> [usize; 4] {
    self.shape
  }

  pub fn layout(&self) -> TensorLayout {
    self.layout
  }

  pub fn element_type(&self) -> ElementType {
    match self.data {
      TensorData::U8(_) => ElementType::U8,
      TensorData::F32(_) => ElementType::F32,
    }
  }

  pub fn data(&self) -> &TensorData {
    &self.data
  }

  pub fn len(&self) -> usize {
    match &self.data {
      TensorData::U8(d) => d.len(),
      TensorData::F32(d) => d.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn as_u8(&self) -> Option<&[u8]> {
    match &self.data {
      TensorData::U8(d) => Some(d),
      TensorData::F32(_) => None,
    }
  }

  pub fn as_f32(&self) -> Option<&[f32]> {
    match &self.data {
      TensorData::F32(d) => Some(d),
      TensorData::U8(_) => None,
    }
  }
}

/// 将缩放后的帧展开为模型输入张量
///
/// `U8` 原样输出 [0, 255]，`F32` 每个通道值除以 255 得到 [0.0, 1.0]。
/// 帧尺寸必须与 `height`/`width` 一致。
pub fn build_tensor(
  frame: &RgbNhwcFrame,
  height: usize,
  width: usize,
  element_type: ElementType,
  layout: TensorLayout,
) -> Result<InputTensor, TensorError> {
  if frame.height() != height || frame.width() != width {
    return Err(TensorError::ShapeMismatch {
      expected_h: height,
      expected_w: width,
      actual_h: frame.height(),
      actual_w: frame.width(),
    });
  }

  let (shape, pixels): ([usize; 4], std::borrow::Cow<'_, [u8]>) = match layout {
    TensorLayout::Nhwc => (
      [1, height, width, RGB_CHANNELS],
      std::borrow::Cow::Borrowed(frame.as_nhwc()),
    ),
    TensorLayout::Nchw => (
      [1, RGB_CHANNELS, height, width],
      std::borrow::Cow::Owned(RgbNchwFrame::from(frame).as_nchw().to_vec()),
    ),
  };

  let data = match element_type {
    ElementType::U8 => TensorData::U8(pixels.into_owned().into_boxed_slice()),
    ElementType::F32 => TensorData::F32(pixels.iter().map(|&v| v as f32 / 255.0).collect()),
  };

  Ok(InputTensor {
    shape,
    layout,
    data,
  })
}
