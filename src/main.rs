// 该文件是 Xunying （寻影） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use xunying::{
  FromUrl,
  cancel::CancelToken,
  embedding::Embedder,
  input::InputWrapper,
  model::TractModel,
  output::OutputWrapper,
  preprocess::{Normalization, Preprocessor},
  reference::ReferenceSet,
  task::{ContinuousTask, MatchSession, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let model = TractModel::from_url(&args.model)?;
  let preprocessor = Preprocessor::new(model.width(), model.height(), Normalization::REID)?;
  let embedder = Embedder::new(model);
  let references = ReferenceSet::load(&args.references, &preprocessor, &embedder)?;

  let cancel = CancelToken::new();
  cancel.install_ctrlc()?;

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let session = MatchSession::new(references, preprocessor)
    .with_metric(args.metric)
    .with_cancel_token(cancel)
    .with_idle_backoff(Duration::from_millis(args.idle_backoff_ms))
    .with_max_consecutive_failures(args.max_failures);

  let report = ContinuousTask::new(session)
    .with_frame_number(args.frame_number)
    .run_task(input, &embedder, output)?;

  info!(
    "任务结束: 拉取 {} 帧, 匹配 {} 帧, 跳过 {} 帧{}",
    report.frames_pulled,
    report.frames_matched,
    report.frames_skipped,
    if report.cancelled { " (已中断)" } else { "" }
  );

  Ok(())
}
