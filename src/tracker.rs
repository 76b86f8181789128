// 该文件是 Xunying （寻影） 项目的一部分。
// src/tracker.rs - 最佳匹配跟踪
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

use std::collections::HashMap;

/// 单个参考标签的匹配状态
///
/// `Unobserved` 只会在第一次更新时转为 `Tracking`，之后不再回退；
/// `best` 单调不增。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum MatchState {
  #[default]
  Unobserved,
  Tracking { best: f64, observations: u64 },
}

impl MatchState {
  pub fn best(&self) -> Option<f64> {
    match self {
      MatchState::Unobserved => None,
      MatchState::Tracking { best, .. } => Some(*best),
    }
  }

  pub fn observations(&self) -> u64 {
    match self {
      MatchState::Unobserved => 0,
      MatchState::Tracking { observations, .. } => *observations,
    }
  }

  fn record(&mut self, distance: f64) -> f64 {
    // NaN 不会替换已有的最小值
    let (best, observations) = match *self {
      MatchState::Unobserved => (f64::INFINITY.min(distance), 1),
      MatchState::Tracking { best, observations } => (best.min(distance), observations + 1),
    };
    *self = MatchState::Tracking { best, observations };
    best
  }
}

/// 每个参考标签的运行最小距离，生命周期为一次匹配会话
#[derive(Debug, Clone, Default)]
pub struct MatchTracker {
  states: HashMap<String, MatchState>,
}

impl MatchTracker {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_labels<I, S>(labels: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      states: labels
        .into_iter()
        .map(|label| (label.into(), MatchState::Unobserved))
        .collect(),
    }
  }

  /// 记录一次距离并返回更新后的最小值
  pub fn update(&mut self, label: &str, distance: f64) -> f64 {
    match self.states.get_mut(label) {
      Some(state) => state.record(distance),
      None => {
        let mut state = MatchState::Unobserved;
        let best = state.record(distance);
        self.states.insert(label.to_string(), state);
        best
      }
    }
  }

  pub fn current_best(&self, label: &str) -> MatchState {
    self.states.get(label).copied().unwrap_or_default()
  }
}
