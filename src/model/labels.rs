// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/model/labels.rs - 标签表
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

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("标签文件不存在: {0}")]
  NotFound(String),
  #[error("读取标签文件 {path} 失败: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// 与模型输出按索引对齐的标签表，加载后不可变
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelList {
  labels: Box<[String]>,
}

impl LabelList {
  /// 每行一个标签，去除首尾空白后丢弃空行
  pub fn parse(text: &str) -> Self {
    let labels = text
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(str::to_string)
      .collect::<Vec<_>>();
    Self {
      labels: labels.into_boxed_slice(),
    }
  }

  pub fn load(path: &Path) -> Result<Self, LabelError> {
    let text = std::fs::read_to_string(path).map_err(|source| {
      if source.kind() == std::io::ErrorKind::NotFound {
        LabelError::NotFound(path.display().to_string())
      } else {
        LabelError::Io {
          path: path.display().to_string(),
          source,
        }
      }
    })?;
    let labels = Self::parse(&text);
    debug!("从 {} 加载 {} 个标签", path.display(), labels.len());
    Ok(labels)
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.labels.get(index).map(String::as_str)
  }

  pub fn as_slice(&self) -> &[String] {
    &self.labels
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }
}

impl FromIterator<String> for LabelList {
  fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
    Self {
      labels: iter.into_iter().collect(),
    }
  }
}
