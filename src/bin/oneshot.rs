// 该文件是 Xunying （寻影） 项目的一部分。
// src/bin/oneshot.rs - 单帧比对
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;
use xunying::{
  FromUrl,
  distance::Metric,
  embedding::Embedder,
  input::InputWrapper,
  model::TractModel,
  output::OutputWrapper,
  preprocess::{Normalization, Preprocessor},
  reference::{ReferenceSet, ReferenceSpec},
  task::{MatchSession, OneShotTask, Task},
};

/// 将一张图像与参考集比对
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 重识别模型
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 观测输出
  #[arg(long, value_name = "OUTPUT", default_value = "log:")]
  pub output: Url,
  /// 参考图像 LABEL=URL，可重复
  #[arg(long = "reference", value_name = "LABEL=URL", required = true)]
  pub references: Vec<ReferenceSpec>,
  /// 距离度量
  #[arg(long, value_enum, default_value_t = Metric::Cosine)]
  pub metric: Metric,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);

  let model = TractModel::from_url(&args.model)?;
  let preprocessor = Preprocessor::new(model.width(), model.height(), Normalization::REID)?;
  let embedder = Embedder::new(model);
  let references = ReferenceSet::load(&args.references, &preprocessor, &embedder)?;

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let session = MatchSession::new(references, preprocessor).with_metric(args.metric);
  let report = OneShotTask::new(session).run_task(input, &embedder, output)?;

  for (label, state) in report.matches.iter() {
    match state.best() {
      Some(distance) => info!("{}: {:.6}", label, distance),
      None => info!("{}: 未匹配", label),
    }
  }

  Ok(())
}
