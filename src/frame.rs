// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/frame.rs - NHWC/NCHW 帧定义
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

use image::RgbImage;

pub const RGB_CHANNELS: usize = 3;

pub trait AsNchwFrame {
  fn as_nchw(&self) -> &[u8];
}

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

/// 缩放后的 RGB 像素网格，按行优先、通道交错（R, G, B, R, G, B, ...）存放
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbNhwcFrame {
  height: usize,
  width: usize,
  data: Box<[u8]>,
}

impl RgbNhwcFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    Self {
      height,
      width,
      data: vec![0u8; RGB_CHANNELS * height * width].into_boxed_slice(),
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }
}

impl AsMut<[u8]> for RgbNhwcFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl AsNhwcFrame for RgbNhwcFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

impl From<RgbImage> for RgbNhwcFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    // RgbImage 的内存布局本身就是 HWC
    Self {
      height: height as usize,
      width: width as usize,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

/// 通道优先的 RGB 帧，供声明 `[1, 3, H, W]` 输入的模型使用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbNchwFrame {
  height: usize,
  width: usize,
  data: Box<[u8]>,
}

impl RgbNchwFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    Self {
      height,
      width,
      data: vec![0u8; RGB_CHANNELS * height * width].into_boxed_slice(),
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }
}

impl AsMut<[u8]> for RgbNchwFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl AsNchwFrame for RgbNchwFrame {
  fn as_nchw(&self) -> &[u8] {
    &self.data
  }
}

impl From<&RgbNhwcFrame> for RgbNchwFrame {
  fn from(nhwc: &RgbNhwcFrame) -> Self {
    let mut frame = RgbNchwFrame::with_shape(nhwc.height(), nhwc.width());

    let channels = frame.channels();
    let height = frame.height();
    let width = frame.width();
    let source = nhwc.as_nhwc();
    let slice = frame.as_mut();

    for c in 0..channels {
      for h in 0..height {
        for w in 0..width {
          let src = h * width * channels + w * channels + c;
          let dst = c * height * width + h * width + w;
          slice[dst] = source[src];
        }
      }
    }
    frame
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn nhwc_keeps_pixel_order() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([1, 2, 3]));
    image.put_pixel(1, 0, Rgb([4, 5, 6]));

    let frame = RgbNhwcFrame::from(image);
    assert_eq!(frame.height(), 1);
    assert_eq!(frame.width(), 2);
    assert_eq!(frame.as_nhwc(), &[1, 2, 3, 4, 5, 6]);
  }

  #[test]
  fn nchw_groups_channels() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([1, 2, 3]));
    image.put_pixel(1, 0, Rgb([4, 5, 6]));

    let nhwc = RgbNhwcFrame::from(image);
    let nchw = RgbNchwFrame::from(&nhwc);
    assert_eq!(nchw.as_nchw(), &[1, 4, 2, 5, 3, 6]);
  }
}
