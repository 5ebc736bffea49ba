// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use chrono::{DateTime, Datelike, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme, classifier::DiagnosticBundle, input::ImageBytes, output::Render,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按日期分目录保存分类记录
///
/// `folder:///data/records?image&always`
///
/// - `image`：同时保存原始图像字节
/// - `always`：失败的分类也写入记录
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  save_image: bool,
  always: bool,
  record_counter: Mutex<u16>,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let save_image = uri.query_pairs().any(|(k, _)| k == "image");
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      save_image,
      always,
      record_counter: Mutex::new(0),
    })
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      save_image: false,
      always: false,
      record_counter: Mutex::new(0),
    }
  }

  pub fn with_image(mut self, save_image: bool) -> Self {
    self.save_image = save_image;
    self
  }

  pub fn with_always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn record_id(&self) -> u16 {
    let mut counter = self
      .record_counter
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    let id = counter.wrapping_add(1);
    *counter = id;
    id
  }

  /// `<dir>/YYYY/MM/DD/HH-MM-SS-XXXX`，不带扩展名
  fn record_stem(&self, now: &DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}",
      now.format("%H-%M-%S"),
      self.record_id()
    )))
  }
}

fn image_extension(bytes: &[u8]) -> &'static str {
  image::guess_format(bytes)
    .ok()
    .and_then(|format| format.extensions_str().first().copied())
    .unwrap_or("bin")
}

impl Render<ImageBytes, DiagnosticBundle> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, input: &ImageBytes, result: &DiagnosticBundle) -> Result<(), Self::Error> {
    if !self.always && !result.is_ok() {
      return Ok(());
    }

    let now = Utc::now();
    let stem = self.record_stem(&now)?;

    let mut record = result.to_json();
    record["source"] = input.name.clone().into();
    record["recorded_at"] = now.to_rfc3339().into();

    if self.save_image {
      let image_path = stem.with_extension(image_extension(&input.bytes));
      std::fs::write(&image_path, &input.bytes)?;
      record["image"] = image_path.display().to_string().into();
    }

    let record_path = stem.with_extension("json");
    std::fs::write(&record_path, serde_json::to_vec_pretty(&record)?)?;
    debug!("记录已写入 {}", record_path.display());

    Ok(())
  }
}
