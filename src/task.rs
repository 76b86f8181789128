// 该文件是 Xunying （寻影） 项目的一部分。
// src/task.rs - 匹配任务
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
  fmt, thread,
  time::{Duration, Instant},
};

use image::DynamicImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  cancel::CancelToken,
  distance::Metric,
  embedding::{EmbedError, Embedder},
  input::{FrameSource, Pull},
  model::Model,
  output::{LabelMatch, Observation, ObservationSink, Skip},
  preprocess::Preprocessor,
  reference::ReferenceSet,
  tracker::{MatchState, MatchTracker},
};

/// 单帧处理的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Pull,
  Preprocess,
  Embed,
  Distance,
  Output,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Stage::Pull => write!(f, "拉取帧"),
      Stage::Preprocess => write!(f, "预处理"),
      Stage::Embed => write!(f, "嵌入推理"),
      Stage::Distance => write!(f, "距离计算"),
      Stage::Output => write!(f, "输出"),
    }
  }
}

/// 会话级致命错误，携带失败的阶段与帧序号
#[derive(Error, Debug)]
pub enum TaskError {
  #[error("第 {frame_index} 帧{stage}失败: {source}")]
  Frame {
    frame_index: u64,
    stage: Stage,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
  #[error("连续 {count} 次推理失败 (第 {frame_index} 帧): {source}")]
  TooManyInferenceFailures {
    count: u32,
    frame_index: u64,
    #[source]
    source: EmbedError,
  },
  #[error("没有输入帧")]
  NoFrame,
}

impl TaskError {
  fn frame(
    frame_index: u64,
    stage: Stage,
    source: impl std::error::Error + Send + Sync + 'static,
  ) -> Self {
    TaskError::Frame {
      frame_index,
      stage,
      source: Box::new(source),
    }
  }

  pub fn stage(&self) -> Option<Stage> {
    match self {
      TaskError::Frame { stage, .. } => Some(*stage),
      TaskError::TooManyInferenceFailures { .. } => Some(Stage::Embed),
      TaskError::NoFrame => None,
    }
  }

  pub fn frame_index(&self) -> Option<u64> {
    match self {
      TaskError::Frame { frame_index, .. }
      | TaskError::TooManyInferenceFailures { frame_index, .. } => Some(*frame_index),
      TaskError::NoFrame => None,
    }
  }
}

/// 会话结束时的汇总
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionReport {
  /// 拉取到的帧数（含被跳过的帧）
  pub frames_pulled: u64,
  pub frames_matched: u64,
  pub frames_skipped: u64,
  pub cancelled: bool,
  /// 按参考集顺序排列的最终状态
  pub matches: Vec<(String, MatchState)>,
}

impl SessionReport {
  pub fn state(&self, label: &str) -> MatchState {
    self
      .matches
      .iter()
      .find(|(l, _)| l == label)
      .map(|(_, state)| *state)
      .unwrap_or_default()
  }

  pub fn best(&self, label: &str) -> Option<f64> {
    self.state(label).best()
  }
}

/// 一次匹配会话的配置
#[derive(Debug, Clone)]
pub struct MatchSession {
  references: ReferenceSet,
  preprocessor: Preprocessor,
  metric: Metric,
  cancel: CancelToken,
  idle_backoff: Duration,
  max_consecutive_failures: u32,
}

impl MatchSession {
  pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(10);
  pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

  pub fn new(references: ReferenceSet, preprocessor: Preprocessor) -> Self {
    Self {
      references,
      preprocessor,
      metric: Metric::default(),
      cancel: CancelToken::new(),
      idle_backoff: Self::DEFAULT_IDLE_BACKOFF,
      max_consecutive_failures: Self::DEFAULT_MAX_CONSECUTIVE_FAILURES,
    }
  }

  pub fn with_metric(mut self, metric: Metric) -> Self {
    self.metric = metric;
    self
  }

  pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  /// 无可用帧时的等待间隔
  pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
    self.idle_backoff = idle_backoff;
    self
  }

  /// 第 N 次连续推理失败即终止会话，N 至少为 1
  pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
    self.max_consecutive_failures = max.max(1);
    self
  }

  pub fn references(&self) -> &ReferenceSet {
    &self.references
  }

  pub fn metric(&self) -> Metric {
    self.metric
  }

  pub fn cancel_token(&self) -> &CancelToken {
    &self.cancel
  }

  fn start<'a, M: Model>(&'a self, embedder: &'a Embedder<M>) -> Run<'a, M> {
    info!(
      "开始任务: {} 个参考, 距离度量 {}",
      self.references.len(),
      self.metric
    );
    Run {
      session: self,
      embedder,
      tracker: MatchTracker::with_labels(self.references.labels()),
      frames_pulled: 0,
      frames_matched: 0,
      frames_skipped: 0,
      failures: 0,
    }
  }
}

enum Next {
  Frame(u64, DynamicImage),
  Invalid(u64, String),
  End,
  Cancelled,
}

/// 单次会话的可变状态，会话结束即丢弃
struct Run<'a, M> {
  session: &'a MatchSession,
  embedder: &'a Embedder<M>,
  tracker: MatchTracker,
  frames_pulled: u64,
  frames_matched: u64,
  frames_skipped: u64,
  failures: u32,
}

impl<M: Model> Run<'_, M> {
  /// 拉取下一帧；无可用帧时退避重试，每次重试前检查取消
  fn next_frame<S: FrameSource>(&mut self, input: &mut S) -> Result<Next, TaskError> {
    loop {
      if self.session.cancel.is_cancelled() {
        return Ok(Next::Cancelled);
      }

      let pulled = input
        .pull()
        .map_err(|e| TaskError::frame(self.frames_pulled + 1, Stage::Pull, e))?;
      match pulled {
        Pull::Frame(image) => {
          if self.session.cancel.is_cancelled() {
            debug!("取消后拉取的帧被丢弃");
            return Ok(Next::Cancelled);
          }
          self.frames_pulled += 1;
          return Ok(Next::Frame(self.frames_pulled, image));
        }
        Pull::Invalid(reason) => {
          if self.session.cancel.is_cancelled() {
            return Ok(Next::Cancelled);
          }
          self.frames_pulled += 1;
          return Ok(Next::Invalid(self.frames_pulled, reason));
        }
        Pull::Pending => thread::sleep(self.session.idle_backoff),
        Pull::End => return Ok(Next::End),
      }
    }
  }

  fn skip<O: ObservationSink>(
    &mut self,
    output: &mut O,
    frame_index: u64,
    stage: Stage,
    reason: String,
  ) -> Result<(), TaskError> {
    self.frames_skipped += 1;
    warn!("跳过第 {} 帧 ({}): {}", frame_index, stage, reason);
    output
      .skip(&Skip {
        frame_index,
        stage,
        reason,
      })
      .map_err(|e| TaskError::frame(frame_index, Stage::Output, e))
  }

  /// 完整处理一帧：预处理、推理、计算全部距离，然后才更新跟踪器
  fn process<O: ObservationSink>(
    &mut self,
    output: &mut O,
    frame_index: u64,
    image: DynamicImage,
  ) -> Result<(), TaskError> {
    debug!("处理第 {} 帧图像", frame_index);

    let tensor = match self.session.preprocessor.preprocess(&image) {
      Ok(tensor) => tensor,
      Err(e) if e.is_invalid_image() => {
        return self.skip(output, frame_index, Stage::Preprocess, e.to_string());
      }
      Err(e) => return Err(TaskError::frame(frame_index, Stage::Preprocess, e)),
    };
    drop(image);

    let now = Instant::now();
    let embedding = match self.embedder.embed(&tensor) {
      Ok(embedding) => {
        self.failures = 0;
        embedding
      }
      Err(e) if e.is_shape_mismatch() => {
        return Err(TaskError::frame(frame_index, Stage::Embed, e));
      }
      Err(e) => {
        self.failures += 1;
        if self.failures >= self.session.max_consecutive_failures {
          return Err(TaskError::TooManyInferenceFailures {
            count: self.failures,
            frame_index,
            source: e,
          });
        }
        return self.skip(output, frame_index, Stage::Embed, e.to_string());
      }
    };
    let elapsed = now.elapsed();
    drop(tensor);

    let session = self.session;
    let distances = session
      .references
      .iter()
      .map(|(label, reference)| {
        session
          .metric
          .distance(reference.as_slice(), embedding.as_slice())
          .map(|distance| (label, distance))
      })
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| TaskError::frame(frame_index, Stage::Distance, e))?;

    let matches = distances
      .into_iter()
      .map(|(label, distance)| LabelMatch {
        label: label.to_string(),
        distance,
        best: self.tracker.update(label, distance),
      })
      .collect();
    self.frames_matched += 1;

    output
      .observe(&Observation {
        frame_index,
        matches,
        elapsed,
      })
      .map_err(|e| TaskError::frame(frame_index, Stage::Output, e))
  }

  fn finish<O: ObservationSink>(
    self,
    output: &mut O,
    cancelled: bool,
  ) -> Result<SessionReport, TaskError> {
    let report = SessionReport {
      frames_pulled: self.frames_pulled,
      frames_matched: self.frames_matched,
      frames_skipped: self.frames_skipped,
      cancelled,
      matches: self
        .session
        .references
        .labels()
        .map(|label| (label.to_string(), self.tracker.current_best(label)))
        .collect(),
    };
    output
      .finish(&report)
      .map_err(|e| TaskError::frame(self.frames_pulled, Stage::Output, e))?;
    Ok(report)
  }
}

pub trait Task<S, M, O>: Sized {
  type Error;
  fn run_task(
    self,
    input: S,
    embedder: &Embedder<M>,
    output: O,
  ) -> Result<SessionReport, Self::Error>;
}

/// 只处理第一帧可用图像
#[derive(Debug, Clone)]
pub struct OneShotTask {
  session: MatchSession,
}

impl OneShotTask {
  pub fn new(session: MatchSession) -> Self {
    Self { session }
  }
}

impl<S: FrameSource, M: Model, O: ObservationSink> Task<S, M, O> for OneShotTask {
  type Error = TaskError;

  fn run_task(
    self,
    mut input: S,
    embedder: &Embedder<M>,
    mut output: O,
  ) -> Result<SessionReport, Self::Error> {
    let mut run = self.session.start(embedder);
    let next = run.next_frame(&mut input).inspect_err(|e| error!("任务终止: {}", e))?;
    match next {
      Next::Frame(frame_index, image) => {
        info!("输入帧获取成功，开始匹配...");
        run
          .process(&mut output, frame_index, image)
          .inspect_err(|e| error!("任务终止: {}", e))?;
        run.finish(&mut output, false)
      }
      Next::Invalid(frame_index, reason) => {
        run
          .skip(&mut output, frame_index, Stage::Pull, reason)
          .inspect_err(|e| error!("任务终止: {}", e))?;
        run.finish(&mut output, false)
      }
      Next::Cancelled => {
        warn!("中断信号接收，未处理任何帧");
        run.finish(&mut output, true)
      }
      Next::End => Err(TaskError::NoFrame),
    }
  }
}

/// 持续拉取并匹配，直到输入结束、收到取消信号或达到指定帧数
#[derive(Debug, Clone)]
pub struct ContinuousTask {
  session: MatchSession,
  frame_number: Option<u64>,
}

impl ContinuousTask {
  pub fn new(session: MatchSession) -> Self {
    Self {
      session,
      frame_number: None,
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<S: FrameSource, M: Model, O: ObservationSink> Task<S, M, O> for ContinuousTask {
  type Error = TaskError;

  fn run_task(
    self,
    mut input: S,
    embedder: &Embedder<M>,
    mut output: O,
  ) -> Result<SessionReport, Self::Error> {
    let mut run = self.session.start(embedder);
    let mut now = Instant::now();

    let cancelled = loop {
      let next = run.next_frame(&mut input).inspect_err(|e| error!("任务终止: {}", e))?;
      let frame_index = match next {
        Next::Frame(frame_index, image) => {
          run
            .process(&mut output, frame_index, image)
            .inspect_err(|e| error!("任务终止: {}", e))?;
          frame_index
        }
        Next::Invalid(frame_index, reason) => {
          run
            .skip(&mut output, frame_index, Stage::Pull, reason)
            .inspect_err(|e| error!("任务终止: {}", e))?;
          frame_index
        }
        Next::Cancelled => {
          warn!("中断信号接收，退出任务循环");
          break true;
        }
        Next::End => {
          info!("输入结束，退出任务循环");
          break false;
        }
      };
      debug!("第 {} 帧完成，耗时: {:.2?}", frame_index, now.elapsed());
      now = Instant::now();

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break false;
      }
    };

    run.finish(&mut output, cancelled)
  }
}
