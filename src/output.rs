// 该文件是 Xunying （寻影） 项目的一部分。
// src/output.rs - 输出定义
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

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  task::{SessionReport, Stage},
};

/// 单个参考标签在某一帧上的结果
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMatch {
  pub label: String,
  pub distance: f64,
  /// 截至本帧（含）的运行最小距离
  pub best: f64,
}

/// 一帧的完整观测，按参考集顺序排列
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
  pub frame_index: u64,
  pub matches: Vec<LabelMatch>,
  pub elapsed: Duration,
}

impl Observation {
  pub fn get(&self, label: &str) -> Option<&LabelMatch> {
    self.matches.iter().find(|m| m.label == label)
  }
}

/// 被跳过的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip {
  pub frame_index: u64,
  pub stage: Stage,
  pub reason: String,
}

pub trait ObservationSink {
  type Error: std::error::Error + Send + Sync + 'static;

  fn observe(&mut self, observation: &Observation) -> Result<(), Self::Error>;
  fn skip(&mut self, skip: &Skip) -> Result<(), Self::Error>;
  fn finish(&mut self, _report: &SessionReport) -> Result<(), Self::Error> {
    Ok(())
  }
}

impl<T: ObservationSink + ?Sized> ObservationSink for &mut T {
  type Error = T::Error;

  fn observe(&mut self, observation: &Observation) -> Result<(), Self::Error> {
    (**self).observe(observation)
  }

  fn skip(&mut self, skip: &Skip) -> Result<(), Self::Error> {
    (**self).skip(skip)
  }

  fn finish(&mut self, report: &SessionReport) -> Result<(), Self::Error> {
    (**self).finish(report)
  }
}

mod json_lines;
mod log_output;
pub use self::json_lines::{JsonLinesOutput, JsonLinesOutputError};
pub use self::log_output::LogOutput;

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("JSON Lines 输出错误: {0}")]
  JsonLinesOutputError(#[from] JsonLinesOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  Log(LogOutput),
  JsonLines(JsonLinesOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LogOutput::SCHEME => Ok(OutputWrapper::Log(LogOutput::default())),
      JsonLinesOutput::SCHEME => Ok(OutputWrapper::JsonLines(JsonLinesOutput::from_url(url)?)),
      scheme => Err(OutputError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl ObservationSink for OutputWrapper {
  type Error = OutputError;

  fn observe(&mut self, observation: &Observation) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Log(output) => output.observe(observation).map_err(|e| match e {}),
      OutputWrapper::JsonLines(output) => output.observe(observation).map_err(OutputError::from),
    }
  }

  fn skip(&mut self, skip: &Skip) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Log(output) => output.skip(skip).map_err(|e| match e {}),
      OutputWrapper::JsonLines(output) => output.skip(skip).map_err(OutputError::from),
    }
  }

  fn finish(&mut self, report: &SessionReport) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Log(output) => output.finish(report).map_err(|e| match e {}),
      OutputWrapper::JsonLines(output) => output.finish(report).map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dispatches_on_scheme() -> anyhow::Result<()> {
    assert!(matches!(
      OutputWrapper::from_url(&Url::parse("log:")?)?,
      OutputWrapper::Log(_)
    ));
    assert!(matches!(
      OutputWrapper::from_url(&Url::parse("jsonl:-")?)?,
      OutputWrapper::JsonLines(_)
    ));
    assert!(matches!(
      OutputWrapper::from_url(&Url::parse("rtsp://host/stream")?),
      Err(OutputError::SchemeMismatch(_))
    ));
    Ok(())
  }
}
