// 该文件是 Xunying （寻影） 项目的一部分。
// src/model.rs - 模型
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

use crate::frame::Tensor;

/// 嵌入模型：`张量 -> 嵌入向量`
///
/// 实现方声明输入/输出长度，调用方据此校验形状；推理本身对本库是黑盒。
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  fn input_len(&self) -> usize;
  fn output_len(&self) -> usize;
  fn infer(&self, input: &Tensor) -> Result<Vec<f32>, Self::Error>;
}

impl<M: Model + ?Sized> Model for &M {
  type Error = M::Error;

  fn input_len(&self) -> usize {
    (**self).input_len()
  }

  fn output_len(&self) -> usize {
    (**self).output_len()
  }

  fn infer(&self, input: &Tensor) -> Result<Vec<f32>, Self::Error> {
    (**self).infer(input)
  }
}

/// 以闭包作为推理函数的模型
pub struct FnModel<F> {
  input_len: usize,
  output_len: usize,
  infer: F,
}

impl<F> FnModel<F> {
  pub fn new(input_len: usize, output_len: usize, infer: F) -> Self {
    Self {
      input_len,
      output_len,
      infer,
    }
  }
}

impl<F, E> Model for FnModel<F>
where
  F: Fn(&Tensor) -> Result<Vec<f32>, E>,
  E: std::error::Error + Send + Sync + 'static,
{
  type Error = E;

  fn input_len(&self) -> usize {
    self.input_len
  }

  fn output_len(&self) -> usize {
    self.output_len
  }

  fn infer(&self, input: &Tensor) -> Result<Vec<f32>, Self::Error> {
    (self.infer)(input)
  }
}

#[cfg(feature = "model_tract")]
mod tract;
#[cfg(feature = "model_tract")]
pub use self::tract::{TractModel, TractModelBuilder, TractModelError};
