// 该文件是 Xunying （寻影） 项目的一部分。
// src/frame.rs - NCHW 浮点张量定义
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

use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
pub struct TensorLengthError {
  pub expected: usize,
  pub actual: usize,
}

/// 张量形状 `[channels, height, width]`，批大小固定为 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorShape {
  pub channels: usize,
  pub height: usize,
  pub width: usize,
}

impl TensorShape {
  pub const fn rgb(width: u32, height: u32) -> Self {
    Self {
      channels: RGB_CHANNELS,
      height: height as usize,
      width: width as usize,
    }
  }

  pub const fn plane_len(&self) -> usize {
    self.height * self.width
  }

  pub const fn len(&self) -> usize {
    self.channels * self.plane_len()
  }

  pub const fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 按通道平面顺序排列的 f32 张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: TensorShape,
  data: Box<[f32]>,
}

impl Tensor {
  pub fn zeros(shape: TensorShape) -> Self {
    Self {
      shape,
      data: vec![0.0f32; shape.len()].into_boxed_slice(),
    }
  }

  pub fn from_vec(shape: TensorShape, data: Vec<f32>) -> Result<Self, TensorLengthError> {
    if data.len() != shape.len() {
      return Err(TensorLengthError {
        expected: shape.len(),
        actual: data.len(),
      });
    }

    Ok(Self {
      shape,
      data: data.into_boxed_slice(),
    })
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  /// 第 `channel` 个通道平面，通道越界时返回 `None`
  pub fn plane(&self, channel: usize) -> Option<&[f32]> {
    if channel >= self.shape.channels {
      return None;
    }
    let plane = self.shape.plane_len();
    self.data.get(channel * plane..(channel + 1) * plane)
  }

  pub fn into_vec(self) -> Vec<f32> {
    self.data.into_vec()
  }
}

impl AsRef<[f32]> for Tensor {
  fn as_ref(&self) -> &[f32] {
    &self.data
  }
}

impl AsMut<[f32]> for Tensor {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn shape_length_counts_every_plane() {
    let shape = TensorShape::rgb(112, 224);
    assert_eq!(shape.channels, 3);
    assert_eq!(shape.plane_len(), 112 * 224);
    assert_eq!(shape.len(), 3 * 112 * 224);
  }

  #[test]
  fn from_vec_rejects_wrong_length() {
    let shape = TensorShape::rgb(2, 2);
    let err = Tensor::from_vec(shape, vec![0.0; 11]).unwrap_err();
    assert_eq!(
      err,
      TensorLengthError {
        expected: 12,
        actual: 11
      }
    );
  }

  #[test]
  fn planes_are_contiguous_in_channel_order() {
    let shape = TensorShape::rgb(2, 1);
    let tensor = Tensor::from_vec(shape, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    assert_eq!(tensor.plane(0), Some(&[1.0, 2.0][..]));
    assert_eq!(tensor.plane(1), Some(&[3.0, 4.0][..]));
    assert_eq!(tensor.plane(2), Some(&[5.0, 6.0][..]));
  }

  #[test]
  fn out_of_range_plane_is_none() {
    let tensor = Tensor::zeros(TensorShape::rgb(2, 1));
    assert!(tensor.plane(3).is_none());
    assert!(tensor.plane(usize::MAX).is_none());
  }
}
