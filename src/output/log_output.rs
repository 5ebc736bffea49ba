// 该文件是 Yebing （叶病识别） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use thiserror::Error;
use tracing::{info, warn};

use crate::{
  FromUrl, FromUrlWithScheme, classifier::DiagnosticBundle, input::ImageBytes, output::Render,
};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 把分类结果写入 tracing 日志
///
/// `log://` 输出前若干个类别，`log://?json` 输出完整的诊断信息。
#[derive(Debug, Clone, Default)]
pub struct LogOutput {
  json: bool,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch);
    }
    let json = uri.query_pairs().any(|(k, _)| k == "json");
    Ok(LogOutput { json })
  }
}

impl Render<ImageBytes, DiagnosticBundle> for LogOutput {
  type Error = LogOutputError;

  fn render_result(&self, input: &ImageBytes, result: &DiagnosticBundle) -> Result<(), Self::Error> {
    if self.json {
      info!("{}: {}", input.name, result.to_json());
      return Ok(());
    }

    match &result.error {
      Some(err) => warn!(
        "{} [{}] 分类失败 ({}): {}",
        input.name,
        result.signature,
        err.kind(),
        err
      ),
      None => {
        info!(
          "{} [{}] 耗时 {:.2?}",
          input.name, result.signature, result.elapsed
        );
        for (rank, p) in result.top.iter().enumerate() {
          info!(
            "  #{} {:<40} {:>6.2}% (类别 {})",
            rank + 1,
            p.label,
            p.score * 100.0,
            p.index
          );
        }
      }
    }
    Ok(())
  }
}
