// 该文件是 Xunying （寻影） 项目的一部分。
// src/distance.rs - 向量距离
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

use std::fmt;

use clap::ValueEnum;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("向量长度不匹配: {left} 与 {right}")]
pub struct DistanceError {
  pub left: usize,
  pub right: usize,
}

fn check_lengths(a: &[f32], b: &[f32]) -> Result<(), DistanceError> {
  if a.len() != b.len() || a.is_empty() {
    return Err(DistanceError {
      left: a.len(),
      right: b.len(),
    });
  }
  Ok(())
}

/// 余弦距离 `1 - a·b / (‖a‖‖b‖)`，以 f64 累加
///
/// 任一向量范数为 0 时返回 `f64::INFINITY`，与任何真实距离都可区分；
/// 向量含 NaN 或无穷分量时返回 `f64::NAN`，不会被当作完全匹配。
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f64, DistanceError> {
  check_lengths(a, b)?;

  let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
  for (&x, &y) in a.iter().zip(b) {
    let (x, y) = (x as f64, y as f64);
    dot += x * y;
    norm_a += x * x;
    norm_b += y * y;
  }

  if norm_a == 0.0 || norm_b == 0.0 {
    return Ok(f64::INFINITY);
  }

  let distance = 1.0 - dot / (norm_a * norm_b).sqrt();
  if !distance.is_finite() {
    return Ok(f64::NAN);
  }
  // 舍入误差可能让 d(a, a) 略小于 0
  Ok(distance.max(0.0))
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f64, DistanceError> {
  check_lengths(a, b)?;

  let sum: f64 = a
    .iter()
    .zip(b)
    .map(|(&x, &y)| {
      let d = x as f64 - y as f64;
      d * d
    })
    .sum();

  Ok(sum.sqrt())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Metric {
  #[default]
  Cosine,
  Euclidean,
}

impl Metric {
  pub fn distance(&self, a: &[f32], b: &[f32]) -> Result<f64, DistanceError> {
    match self {
      Metric::Cosine => cosine_distance(a, b),
      Metric::Euclidean => euclidean_distance(a, b),
    }
  }
}

impl fmt::Display for Metric {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Metric::Cosine => write!(f, "cosine"),
      Metric::Euclidean => write!(f, "euclidean"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLES: [[f32; 4]; 5] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.3, -1.7, 2.5, 0.01],
    [123.0, 4.5, -6.25, 7.0],
    [1e-3, 2e-3, -5e-4, 0.0],
    [-0.9, 0.1, 0.0, 3.3],
  ];

  #[test]
  fn cosine_is_symmetric_and_zero_on_self() -> anyhow::Result<()> {
    for a in &SAMPLES {
      assert_eq!(cosine_distance(a, a)?, 0.0);
      for b in &SAMPLES {
        assert_eq!(cosine_distance(a, b)?, cosine_distance(b, a)?);
      }
    }
    Ok(())
  }

  #[test]
  fn cosine_of_orthogonal_and_opposite_vectors() -> anyhow::Result<()> {
    assert_eq!(cosine_distance(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0])?, 1.0);
    assert_eq!(cosine_distance(&[1.0, 2.0], &[-1.0, -2.0])?, 2.0);
    Ok(())
  }

  #[test]
  fn cosine_zero_norm_is_infinite() -> anyhow::Result<()> {
    let d = cosine_distance(&[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0])?;
    assert!(d.is_infinite() && d.is_sign_positive());
    assert!(cosine_distance(&[0.0; 3], &[0.0; 3])?.is_infinite());
    Ok(())
  }

  #[test]
  fn non_finite_components_are_never_a_match() -> anyhow::Result<()> {
    let reference = [1.0, 0.0, 0.0];
    for query in [
      [f32::NAN, 0.0, 0.0],
      [f32::INFINITY, 0.0, 0.0],
      [f32::NEG_INFINITY, 1.0, 0.0],
    ] {
      assert!(cosine_distance(&reference, &query)?.is_nan());
      assert!(cosine_distance(&query, &reference)?.is_nan());
    }
    Ok(())
  }

  #[test]
  fn euclidean_is_non_negative_and_zero_only_on_equal() -> anyhow::Result<()> {
    for a in &SAMPLES {
      for b in &SAMPLES {
        let d = euclidean_distance(a, b)?;
        assert!(d >= 0.0);
        assert_eq!(d == 0.0, a == b);
        assert_eq!(d, euclidean_distance(b, a)?);
      }
    }
    assert_eq!(euclidean_distance(&[0.0, 3.0], &[4.0, 0.0])?, 5.0);
    Ok(())
  }

  #[test]
  fn mismatched_lengths_fail() {
    for metric in [Metric::Cosine, Metric::Euclidean] {
      for (left, right) in [(1, 2), (3, 1), (4, 7)] {
        let a = vec![1.0; left];
        let b = vec![1.0; right];
        assert_eq!(
          metric.distance(&a, &b),
          Err(DistanceError { left, right })
        );
      }
      assert!(metric.distance(&[], &[]).is_err());
    }
  }
}
