// 该文件是 Xunying （寻影） 项目的一部分。
// src/output/json_lines.rs - JSON Lines 输出
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

use std::{
  fs::File,
  io::{BufWriter, Write},
  path::Path,
};

use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{ObservationSink, Observation, Skip},
  task::SessionReport,
};

#[derive(Error, Debug)]
pub enum JsonLinesOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径无效: {0}")]
  InvalidPath(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
}

/// 每个事件一行 JSON；路径为 `-` 时写入标准输出
///
/// 无穷距离（零范数向量）序列化为 `null`。
pub struct JsonLinesOutput {
  writer: Box<dyn Write + Send>,
}

impl FromUrlWithScheme for JsonLinesOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonLinesOutputError::SchemeMismatch);
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| JsonLinesOutputError::InvalidPath(e.to_string()))?;
    if path == "-" {
      return Ok(Self::new(std::io::stdout()));
    }
    Self::create(path.as_ref())
  }
}

impl JsonLinesOutput {
  pub fn new(writer: impl Write + Send + 'static) -> Self {
    Self {
      writer: Box::new(writer),
    }
  }

  pub fn create(path: impl AsRef<Path>) -> Result<Self, JsonLinesOutputError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    info!("观测结果写入文件: {}", path.display());
    Ok(Self::new(BufWriter::new(File::create(path)?)))
  }

  fn write_event(&mut self, mut event: Value) -> Result<(), JsonLinesOutputError> {
    event["time"] = json!(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
    serde_json::to_writer(&mut self.writer, &event)?;
    self.writer.write_all(b"\n")?;
    self.writer.flush()?;
    Ok(())
  }
}

impl ObservationSink for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn observe(&mut self, observation: &Observation) -> Result<(), Self::Error> {
    let matches = observation
      .matches
      .iter()
      .map(|m| json!({ "label": m.label, "distance": m.distance, "best": m.best }))
      .collect::<Vec<_>>();
    self.write_event(json!({
      "event": "observation",
      "frame": observation.frame_index,
      "elapsed_ms": observation.elapsed.as_secs_f64() * 1000.0,
      "matches": matches,
    }))
  }

  fn skip(&mut self, skip: &Skip) -> Result<(), Self::Error> {
    self.write_event(json!({
      "event": "skip",
      "frame": skip.frame_index,
      "stage": skip.stage.to_string(),
      "reason": skip.reason,
    }))
  }

  fn finish(&mut self, report: &SessionReport) -> Result<(), Self::Error> {
    let best = report
      .matches
      .iter()
      .map(|(label, state)| json!({ "label": label, "best": state.best() }))
      .collect::<Vec<_>>();
    self.write_event(json!({
      "event": "summary",
      "frames_pulled": report.frames_pulled,
      "frames_matched": report.frames_matched,
      "frames_skipped": report.frames_skipped,
      "cancelled": report.cancelled,
      "best": best,
    }))
  }
}
