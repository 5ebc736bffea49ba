// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::{collections::VecDeque, path::PathBuf};

use thiserror::Error;
use tracing::{error, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::ImageBytes};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("目录中没有文件: {0}")]
  EmptyDirectory(String),
}

/// 从单个文件或目录读取原始图像字节，不做任何解码
///
/// 目录按文件名排序后逐个读取；读取失败的文件会被跳过。
pub struct ImageFileInput {
  pending: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(url.path())
  }
}

impl ImageFileInput {
  pub fn open(path: impl Into<PathBuf>) -> Result<Self, ImageFileInputError> {
    let path = path.into();
    let pending = if path.is_dir() {
      let mut files = std::fs::read_dir(&path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect::<Vec<_>>();
      if files.is_empty() {
        return Err(ImageFileInputError::EmptyDirectory(
          path.display().to_string(),
        ));
      }
      files.sort();
      files.into()
    } else {
      // 提前报告文件不存在
      std::fs::metadata(&path)?;
      VecDeque::from([path])
    };

    Ok(Self { pending })
  }

  pub fn remaining(&self) -> usize {
    self.pending.len()
  }
}

impl Iterator for ImageFileInput {
  type Item = ImageBytes;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.pending.pop_front() {
      match std::fs::read(&path) {
        Ok(bytes) => {
          let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
          return Some(ImageBytes::new(name, bytes));
        }
        Err(e) => warn!("读取文件 {} 失败，跳过: {}", path.display(), e),
      }
    }
    None
  }
}
