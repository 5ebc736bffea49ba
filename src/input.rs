// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/input.rs - 图像输入与解码
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

pub mod decode;
pub use self::decode::{
  CanvasDecode, DecodeAttempt, DecodeError, DecodeStrategy, GenericDecode, HintedCodecDecode,
  ImageDecoder,
};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

/// 一张待分类的压缩图像
#[derive(Debug, Clone)]
pub struct ImageBytes {
  /// 来源名称（通常是文件名），只用于日志与记录
  pub name: String,
  pub bytes: Vec<u8>,
}

impl ImageBytes {
  pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
    Self {
      name: name.into(),
      bytes,
    }
  }
}

impl AsRef<[u8]> for ImageBytes {
  fn as_ref(&self) -> &[u8] {
    &self.bytes
  }
}
