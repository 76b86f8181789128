// 该文件是 Xunying （寻影） 项目的一部分。
// src/preprocess.rs - 图像预处理
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

//! # 图像预处理
//!
//! 先以图像中心为锚点裁剪出与模型输入相同宽高比的区域，再缩放到模型输入尺寸，
//! 并按通道归一化为 NCHW 张量：
//!
//! ```text
//! normalized[c][y][x] = (raw[c][y][x] - offset[c]) * scale[c]
//! ```
//!
//! 参考图像与查询帧必须使用同一个 [`Preprocessor`]，缩放算法不同会悄无声息地
//! 降低匹配质量。

use image::{
  DynamicImage,
  imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::debug;

use crate::frame::{RGB_CHANNELS, Tensor, TensorShape};

/// 重识别模型输入宽度
pub const REID_INPUT_W: u32 = 112;
/// 重识别模型输入高度
pub const REID_INPUT_H: u32 = 224;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprocessError {
  #[error("无效图像: 尺寸为 {width}x{height}")]
  EmptyImage { width: u32, height: u32 },
  #[error("无效图像: 通道数为 {0}, 至少需要 3 个")]
  TooFewChannels(u8),
  #[error("目标尺寸无效: {width}x{height}")]
  InvalidTarget { width: u32, height: u32 },
}

impl PreprocessError {
  /// 是否属于输入图像本身的问题（可跳过该帧）
  pub fn is_invalid_image(&self) -> bool {
    matches!(
      self,
      PreprocessError::EmptyImage { .. } | PreprocessError::TooFewChannels(_)
    )
  }
}

/// 每通道的偏移与缩放常量，顺序为 R、G、B
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
  pub offset: [f32; RGB_CHANNELS],
  pub scale: [f32; RGB_CHANNELS],
}

impl Normalization {
  /// 重识别模型训练时使用的常量
  pub const REID: Self = Self {
    offset: [0.485 * 255.0, 0.456 * 255.0, 0.406 * 255.0],
    scale: [
      1.0 / (0.299 * 255.0),
      1.0 / (0.224 * 255.0),
      1.0 / (0.225 * 255.0),
    ],
  };

  pub const IDENTITY: Self = Self {
    offset: [0.0; RGB_CHANNELS],
    scale: [1.0; RGB_CHANNELS],
  };

  #[inline]
  pub fn apply(&self, channel: usize, raw: u8) -> f32 {
    (raw as f32 - self.offset[channel]) * self.scale[channel]
  }
}

impl Default for Normalization {
  fn default() -> Self {
    Self::REID
  }
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
  width: u32,
  height: u32,
  normalization: Normalization,
  filter: FilterType,
}

impl Default for Preprocessor {
  fn default() -> Self {
    Self {
      width: REID_INPUT_W,
      height: REID_INPUT_H,
      normalization: Normalization::REID,
      filter: FilterType::Triangle,
    }
  }
}

impl Preprocessor {
  pub fn new(
    width: u32,
    height: u32,
    normalization: Normalization,
  ) -> Result<Self, PreprocessError> {
    if width == 0 || height == 0 {
      return Err(PreprocessError::InvalidTarget { width, height });
    }

    Ok(Self {
      width,
      height,
      normalization,
      filter: FilterType::Triangle,
    })
  }

  pub fn with_filter(mut self, filter: FilterType) -> Self {
    self.filter = filter;
    self
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn normalization(&self) -> &Normalization {
    &self.normalization
  }

  pub fn output_shape(&self) -> TensorShape {
    TensorShape::rgb(self.width, self.height)
  }

  /// 居中且与目标宽高比一致的最大裁剪窗口 `(x, y, w, h)`
  fn crop_window(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let (w, h) = (width as u64, height as u64);
    let (tw, th) = (self.width as u64, self.height as u64);
    let (cw, ch) = if w * th > h * tw {
      ((h * tw / th).max(1), h)
    } else {
      (w, (w * th / tw).max(1))
    };
    // cw <= w 且 ch <= h，转换不会截断
    let (cw, ch) = (cw as u32, ch as u32);
    ((width - cw) / 2, (height - ch) / 2, cw, ch)
  }

  pub fn preprocess(&self, image: &DynamicImage) -> Result<Tensor, PreprocessError> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
      return Err(PreprocessError::EmptyImage { width, height });
    }

    let channels = image.color().channel_count();
    if (channels as usize) < RGB_CHANNELS {
      return Err(PreprocessError::TooFewChannels(channels));
    }

    // 透明通道直接丢弃
    let rgb = image.to_rgb8();
    let (x, y, cw, ch) = self.crop_window(width, height);
    let cropped = if (cw, ch) == (width, height) {
      rgb
    } else {
      debug!("裁剪图像: {}x{} -> {}x{} @ ({}, {})", width, height, cw, ch, x, y);
      imageops::crop_imm(&rgb, x, y, cw, ch).to_image()
    };
    let resized = if (cw, ch) == (self.width, self.height) {
      cropped
    } else {
      debug!("缩放图像: {}x{} -> {}x{}", cw, ch, self.width, self.height);
      imageops::resize(&cropped, self.width, self.height, self.filter)
    };

    let shape = self.output_shape();
    let plane = shape.plane_len();
    let mut tensor = Tensor::zeros(shape);
    let data = tensor.as_mut();

    for (idx, pixel) in resized.pixels().enumerate() {
      for c in 0..RGB_CHANNELS {
        data[c * plane + idx] = self.normalization.apply(c, pixel[c]);
      }
    }

    Ok(tensor)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage, Rgba, RgbaImage};

  fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
      Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
    }))
  }

  #[test]
  fn output_has_model_shape() -> anyhow::Result<()> {
    let preprocessor = Preprocessor::default();
    let tensor = preprocessor.preprocess(&gradient(640, 480))?;
    assert_eq!(tensor.shape(), TensorShape::rgb(REID_INPUT_W, REID_INPUT_H));
    assert_eq!(tensor.len(), 3 * 112 * 224);
    Ok(())
  }

  #[test]
  fn resizing_is_deterministic() -> anyhow::Result<()> {
    let preprocessor = Preprocessor::default();
    let image = gradient(333, 517);
    let a = preprocessor.preprocess(&image)?;
    let b = preprocessor.preprocess(&image)?;
    let bits = |t: &Tensor| t.as_slice().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&a), bits(&b));
    Ok(())
  }

  #[test]
  fn zero_image_yields_negated_offsets() -> anyhow::Result<()> {
    let preprocessor = Preprocessor::default();
    let image = DynamicImage::ImageRgb8(RgbImage::new(50, 80));
    let tensor = preprocessor.preprocess(&image)?;
    let norm = Normalization::REID;
    for c in 0..RGB_CHANNELS {
      let expected = -norm.offset[c] * norm.scale[c];
      let plane = tensor.plane(c).ok_or_else(|| anyhow::anyhow!("missing plane {}", c))?;
      assert!(plane.iter().all(|&v| v == expected));
    }
    Ok(())
  }

  #[test]
  fn planes_follow_rgb_order() -> anyhow::Result<()> {
    let preprocessor = Preprocessor::new(2, 2, Normalization::IDENTITY)?;
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([10, 20, 30])));
    let tensor = preprocessor.preprocess(&image)?;
    assert_eq!(tensor.plane(0), Some(&[10.0; 4][..]));
    assert_eq!(tensor.plane(1), Some(&[20.0; 4][..]));
    assert_eq!(tensor.plane(2), Some(&[30.0; 4][..]));
    Ok(())
  }

  #[test]
  fn wide_frames_are_centre_cropped() -> anyhow::Result<()> {
    // 两侧红色边缘应被裁掉，只留下中间的灰色区域
    let image = RgbImage::from_fn(448, 224, |x, _| {
      if (168..280).contains(&x) {
        Rgb([128, 128, 128])
      } else {
        Rgb([255, 0, 0])
      }
    });
    let preprocessor = Preprocessor::new(112, 224, Normalization::IDENTITY)?;
    let tensor = preprocessor.preprocess(&DynamicImage::ImageRgb8(image))?;
    let red = tensor.plane(0).ok_or_else(|| anyhow::anyhow!("missing red plane"))?;
    assert!(red.iter().all(|&v| v == 128.0));
    Ok(())
  }

  #[test]
  fn crop_window_matches_target_aspect() -> anyhow::Result<()> {
    let preprocessor = Preprocessor::new(112, 224, Normalization::IDENTITY)?;
    assert_eq!(preprocessor.crop_window(448, 224), (168, 0, 112, 224));
    assert_eq!(preprocessor.crop_window(100, 400), (0, 100, 100, 200));
    assert_eq!(preprocessor.crop_window(56, 112), (0, 0, 56, 112));
    assert_eq!(preprocessor.crop_window(1, 1), (0, 0, 1, 1));
    Ok(())
  }

  #[test]
  fn alpha_channel_is_dropped() -> anyhow::Result<()> {
    let preprocessor = Preprocessor::new(1, 1, Normalization::IDENTITY)?;
    let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([1, 2, 3, 200])));
    let tensor = preprocessor.preprocess(&image)?;
    assert_eq!(tensor.as_slice(), &[1.0, 2.0, 3.0]);
    Ok(())
  }

  #[test]
  fn rejects_invalid_images() {
    let preprocessor = Preprocessor::default();

    let empty = DynamicImage::new_rgb8(0, 10);
    let err = preprocessor.preprocess(&empty).unwrap_err();
    assert_eq!(
      err,
      PreprocessError::EmptyImage {
        width: 0,
        height: 10
      }
    );
    assert!(err.is_invalid_image());

    let gray = DynamicImage::new_luma8(4, 4);
    let err = preprocessor.preprocess(&gray).unwrap_err();
    assert_eq!(err, PreprocessError::TooFewChannels(1));
    assert!(err.is_invalid_image());
  }

  #[test]
  fn rejects_zero_target() {
    let err = Preprocessor::new(0, 224, Normalization::REID).unwrap_err();
    assert!(!err.is_invalid_image());
  }
}
