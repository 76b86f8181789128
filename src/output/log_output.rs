// 该文件是 Xunying （寻影） 项目的一部分。
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

use std::convert::Infallible;

use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{ObservationSink, Observation, Skip},
  task::SessionReport,
};

/// 通过 tracing 输出每帧观测
#[derive(Debug, Default)]
pub struct LogOutput;

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = Infallible;

  fn from_url(_url: &url::Url) -> Result<Self, Self::Error> {
    Ok(LogOutput)
  }
}

impl ObservationSink for LogOutput {
  type Error = Infallible;

  fn observe(&mut self, observation: &Observation) -> Result<(), Self::Error> {
    let scores = observation
      .matches
      .iter()
      .map(|m| format!("{}={:.6} (最佳 {:.6})", m.label, m.distance, m.best))
      .collect::<Vec<_>>()
      .join(", ");
    info!(
      "帧 {} (耗时 {:.2?}): {}",
      observation.frame_index, observation.elapsed, scores
    );
    Ok(())
  }

  fn skip(&mut self, skip: &Skip) -> Result<(), Self::Error> {
    info!(
      "帧 {} 未匹配 ({}): {}",
      skip.frame_index, skip.stage, skip.reason
    );
    Ok(())
  }

  fn finish(&mut self, report: &SessionReport) -> Result<(), Self::Error> {
    info!(
      "处理帧数: {}, 跳过帧数: {}",
      report.frames_matched, report.frames_skipped
    );
    for (label, state) in report.matches.iter() {
      match state.best() {
        Some(best) => info!("{} 最佳距离 = {}", label, best),
        None => info!("{} 未观测", label),
      }
    }
    Ok(())
  }
}
