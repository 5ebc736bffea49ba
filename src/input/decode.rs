// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/input/decode.rs - 图像解码与缩放
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

//! # 图像解码
//!
//! 将任意压缩图像字节解码为目标尺寸的 RGB 像素网格。解码按策略列表顺序尝试，
//! 前一个策略失败时才会进入下一个：
//!
//! 1. [`GenericDecode`]：按内容猜测格式，应用 EXIF 方向，`Triangle` 滤波缩放；
//! 2. [`CanvasDecode`]：按 RGBA 解码，缩放后绘制到目标尺寸的不透明画布上；
//! 3. [`HintedCodecDecode`]：逐个指定编解码器解码，按目标尺寸采样。
//!
//! 所有策略共用 [`decode_limits`]。所有策略都失败时返回 [`DecodeError::Exhausted`]，
//! 其中列出每次尝试的错误。

use std::{fmt, io::Cursor};

use image::{
  DynamicImage, ImageDecoder as _, ImageError, ImageFormat, ImageReader, Limits, Rgba,
  RgbImage, RgbaImage,
  imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::frame::RgbNhwcFrame;

/// 单边最大像素数
pub const MAX_SOURCE_SIDE: u32 = 8192;
/// 单张图像解码缓冲的上限
pub const MAX_SOURCE_ALLOC: u64 = 256 * 1024 * 1024;

/// 所有策略共用的解码限制，声明尺寸过大的输入在分配前被拒绝
pub fn decode_limits() -> Limits {
  let mut limits = Limits::default();
  limits.max_image_width = Some(MAX_SOURCE_SIDE);
  limits.max_image_height = Some(MAX_SOURCE_SIDE);
  limits.max_alloc = Some(MAX_SOURCE_ALLOC);
  limits
}

/// 单个解码策略的失败记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeAttempt {
  pub strategy: &'static str,
  pub message: String,
}

impl fmt::Display for DecodeAttempt {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.strategy, self.message)
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
  #[error("输入图像为空")]
  Empty,
  #[error("目标尺寸无效: {width}x{height}")]
  InvalidTarget { width: u32, height: u32 },
  #[error("所有解码方式均失败: [{}]", join_attempts(.0))]
  Exhausted(Vec<DecodeAttempt>),
}

fn join_attempts(attempts: &[DecodeAttempt]) -> String {
  attempts
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("; ")
}

pub trait DecodeStrategy: Send + Sync {
  fn name(&self) -> &'static str;

  /// 解码并缩放为恰好 `width x height` 的 RGB 图像
  fn decode(&self, bytes: &[u8], width: u32, height: u32) -> Result<RgbImage, ImageError>;
}

/// 通用解码器
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericDecode;

impl DecodeStrategy for GenericDecode {
  fn name(&self) -> &'static str {
    "generic"
  }

  fn decode(&self, bytes: &[u8], width: u32, height: u32) -> Result<RgbImage, ImageError> {
    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(decode_limits());
    let mut decoder = reader.into_decoder()?;

    let mut limits = decode_limits();
    let (source_w, source_h) = decoder.dimensions();
    limits.check_dimensions(source_w, source_h)?;
    limits.reserve(decoder.total_bytes())?;
    decoder.set_limits(limits)?;

    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);

    Ok(
      image
        .resize_exact(width, height, FilterType::Triangle)
        .into_rgb8(),
    )
  }
}

/// 画布渲染：按 RGBA 解码后绘制到目标尺寸的不透明画布上读回
#[derive(Debug, Default, Clone, Copy)]
pub struct CanvasDecode;

impl DecodeStrategy for CanvasDecode {
  fn name(&self) -> &'static str {
    "canvas"
  }

  fn decode(&self, bytes: &[u8], width: u32, height: u32) -> Result<RgbImage, ImageError> {
    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(decode_limits());
    let source = reader.decode()?.into_rgba8();

    let scaled = imageops::resize(&source, width, height, FilterType::Triangle);
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
    imageops::overlay(&mut canvas, &scaled, 0, 0);

    Ok(DynamicImage::ImageRgba8(canvas).into_rgb8())
  }
}

/// 指定编解码器解码，不依赖内容嗅探
#[derive(Debug, Clone)]
pub struct HintedCodecDecode {
  formats: Vec<ImageFormat>,
}

impl Default for HintedCodecDecode {
  fn default() -> Self {
    Self {
      formats: vec![
        ImageFormat::Jpeg,
        ImageFormat::Png,
        ImageFormat::WebP,
        ImageFormat::Bmp,
        ImageFormat::Gif,
      ],
    }
  }
}

impl HintedCodecDecode {
  pub fn with_formats(formats: Vec<ImageFormat>) -> Self {
    Self { formats }
  }
}

impl DecodeStrategy for HintedCodecDecode {
  fn name(&self) -> &'static str {
    "hinted-codec"
  }

  fn decode(&self, bytes: &[u8], width: u32, height: u32) -> Result<RgbImage, ImageError> {
    let mut last_error = None;
    for format in &self.formats {
      let mut reader = ImageReader::with_format(Cursor::new(bytes), *format);
      reader.limits(decode_limits());
      match reader.decode() {
        Ok(image) => {
          debug!("编解码器 {:?} 解码成功", format);
          return Ok(image.thumbnail_exact(width, height).into_rgb8());
        }
        Err(e) => last_error = Some(e),
      }
    }

    Err(last_error.unwrap_or_else(|| {
      ImageError::Unsupported(image::error::UnsupportedError::from_format_and_kind(
        image::error::ImageFormatHint::Unknown,
        image::error::UnsupportedErrorKind::Format(image::error::ImageFormatHint::Unknown),
      ))
    }))
  }
}

/// 按顺序尝试多个解码策略的图像解码器
pub struct ImageDecoder {
  strategies: Vec<Box<dyn DecodeStrategy>>,
}

impl Default for ImageDecoder {
  fn default() -> Self {
    Self::with_strategies(vec![
      Box::new(GenericDecode),
      Box::new(CanvasDecode),
      Box::new(HintedCodecDecode::default()),
    ])
  }
}

impl ImageDecoder {
  pub fn with_strategies(strategies: Vec<Box<dyn DecodeStrategy>>) -> Self {
    Self { strategies }
  }

  pub fn strategy_names(&self) -> Vec<&'static str> {
    self.strategies.iter().map(|s| s.name()).collect()
  }

  pub fn decode(&self, bytes: &[u8], width: u32, height: u32) -> Result<RgbNhwcFrame, DecodeError> {
    if bytes.is_empty() {
      return Err(DecodeError::Empty);
    }
    if width == 0 || height == 0 {
      return Err(DecodeError::InvalidTarget { width, height });
    }

    let mut attempts = Vec::with_capacity(self.strategies.len());
    for strategy in &self.strategies {
      match strategy.decode(bytes, width, height) {
        Ok(image) if image.dimensions() == (width, height) => {
          debug!("解码方式 {} 成功，输出 {}x{}", strategy.name(), width, height);
          return Ok(RgbNhwcFrame::from(image));
        }
        Ok(image) => {
          let (w, h) = image.dimensions();
          warn!(
            "解码方式 {} 输出尺寸不符: 期望 {}x{}, 实际 {}x{}",
            strategy.name(),
            width,
            height,
            w,
            h
          );
          attempts.push(DecodeAttempt {
            strategy: strategy.name(),
            message: format!("输出尺寸 {}x{} 不符", w, h),
          });
        }
        Err(e) => {
          debug!("解码方式 {} 失败: {}", strategy.name(), e);
          attempts.push(DecodeAttempt {
            strategy: strategy.name(),
            message: e.to_string(),
          });
        }
      }
    }

    warn!("所有解码方式均失败，共尝试 {} 种", attempts.len());
    Err(DecodeError::Exhausted(attempts))
  }
}
