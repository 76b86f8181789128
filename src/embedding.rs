// 该文件是 Xunying （寻影） 项目的一部分。
// src/embedding.rs - 嵌入向量与推理调用
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

use thiserror::Error;
use tracing::debug;

use crate::{frame::Tensor, model::Model};

/// 定长嵌入向量，只有同一模型产生的向量才可比较
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
  values: Box<[f32]>,
}

impl Embedding {
  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.values
  }
}

impl From<Vec<f32>> for Embedding {
  fn from(values: Vec<f32>) -> Self {
    Self {
      values: values.into_boxed_slice(),
    }
  }
}

impl<const D: usize> From<[f32; D]> for Embedding {
  fn from(values: [f32; D]) -> Self {
    Self {
      values: Box::new(values),
    }
  }
}

impl AsRef<[f32]> for Embedding {
  fn as_ref(&self) -> &[f32] {
    &self.values
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeSide {
  Input,
  Output,
}

impl fmt::Display for ShapeSide {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ShapeSide::Input => write!(f, "输入"),
      ShapeSide::Output => write!(f, "输出"),
    }
  }
}

#[derive(Error, Debug)]
pub enum EmbedError {
  #[error("模型{side}形状不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  ShapeMismatch {
    side: ShapeSide,
    expected: usize,
    actual: usize,
  },
  #[error("推理失败: {0}")]
  Inference(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("模型输出包含非有限值: 第 {index} 维")]
  NonFinite { index: usize },
}

impl EmbedError {
  pub fn is_shape_mismatch(&self) -> bool {
    matches!(self, EmbedError::ShapeMismatch { .. })
  }
}

/// 嵌入调用器
///
/// 推理前校验张量长度，推理后校验向量长度与有限性；不重试、不缓存。
pub struct Embedder<M> {
  model: M,
}

impl<M: Model> Embedder<M> {
  pub fn new(model: M) -> Self {
    Self { model }
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  pub fn input_len(&self) -> usize {
    self.model.input_len()
  }

  pub fn output_len(&self) -> usize {
    self.model.output_len()
  }

  pub fn embed(&self, tensor: &Tensor) -> Result<Embedding, EmbedError> {
    let expected = self.model.input_len();
    if tensor.len() != expected {
      return Err(EmbedError::ShapeMismatch {
        side: ShapeSide::Input,
        expected,
        actual: tensor.len(),
      });
    }

    let values = self
      .model
      .infer(tensor)
      .map_err(|e| EmbedError::Inference(Box::new(e)))?;

    let expected = self.model.output_len();
    if values.len() != expected {
      return Err(EmbedError::ShapeMismatch {
        side: ShapeSide::Output,
        expected,
        actual: values.len(),
      });
    }

    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
      return Err(EmbedError::NonFinite { index });
    }

    debug!("得到 {} 维嵌入向量", values.len());
    Ok(Embedding::from(values))
  }
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;
  use std::error::Error as _;

  use super::*;
  use crate::{
    frame::{Tensor, TensorShape},
    model::FnModel,
  };

  #[derive(Error, Debug)]
  #[error("设备暂时不可用")]
  struct DeviceBusy;

  fn tensor(width: u32, height: u32) -> Tensor {
    Tensor::zeros(TensorShape::rgb(width, height))
  }

  #[test]
  fn passes_through_model_output() -> anyhow::Result<()> {
    let embedder = Embedder::new(FnModel::new(12, 3, |_: &Tensor| {
      Ok::<_, DeviceBusy>(vec![1.0, 0.0, 0.5])
    }));
    let embedding = embedder.embed(&tensor(2, 2))?;
    assert_eq!(embedding.as_slice(), &[1.0, 0.0, 0.5]);
    Ok(())
  }

  #[test]
  fn input_mismatch_skips_inference() {
    let calls = Cell::new(0);
    let embedder = Embedder::new(FnModel::new(12, 3, |_: &Tensor| {
      calls.set(calls.get() + 1);
      Ok::<_, DeviceBusy>(vec![0.0; 3])
    }));

    let err = embedder.embed(&tensor(3, 3)).unwrap_err();
    assert!(matches!(
      err,
      EmbedError::ShapeMismatch {
        side: ShapeSide::Input,
        expected: 12,
        actual: 27
      }
    ));
    assert_eq!(calls.get(), 0);
  }

  #[test]
  fn output_mismatch_is_reported() {
    let embedder = Embedder::new(FnModel::new(12, 4, |_: &Tensor| {
      Ok::<_, DeviceBusy>(vec![0.0; 3])
    }));
    let err = embedder.embed(&tensor(2, 2)).unwrap_err();
    assert!(err.is_shape_mismatch());
    assert!(matches!(
      err,
      EmbedError::ShapeMismatch {
        side: ShapeSide::Output,
        expected: 4,
        actual: 3
      }
    ));
  }

  #[test]
  fn non_finite_output_is_rejected() {
    for bad in [f32::NAN, f32::INFINITY] {
      let embedder = Embedder::new(FnModel::new(12, 3, move |_: &Tensor| {
        Ok::<_, DeviceBusy>(vec![0.5, bad, 0.0])
      }));
      let err = embedder.embed(&tensor(2, 2)).unwrap_err();
      assert!(!err.is_shape_mismatch());
      assert!(matches!(err, EmbedError::NonFinite { index: 1 }));
    }
  }

  #[test]
  fn inference_failure_is_propagated_once() {
    let calls = Cell::new(0);
    let embedder = Embedder::new(FnModel::new(12, 3, |_: &Tensor| {
      calls.set(calls.get() + 1);
      Err::<Vec<f32>, _>(DeviceBusy)
    }));

    let err = embedder.embed(&tensor(2, 2)).unwrap_err();
    assert!(!err.is_shape_mismatch());
    assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("设备暂时不可用"));
    assert_eq!(calls.get(), 1);
  }
}
