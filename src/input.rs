// 该文件是 Xunying （寻影） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use image::DynamicImage;
use thiserror::Error;

use crate::FromUrl;

/// 一次拉取的结果
#[derive(Debug, Clone)]
pub enum Pull {
  Frame(DynamicImage),
  /// 帧已到达但无法解码，处理循环跳过该帧后继续
  Invalid(String),
  /// 暂无可用帧（例如摄像头尚未就绪），稍后再试
  Pending,
  /// 输入已结束
  End,
}

/// 按需拉取的帧源
///
/// `pull` 可以阻塞等待下一帧，但必须在有限时间内返回，以便调用方检查取消信号。
pub trait FrameSource {
  type Error: std::error::Error + Send + Sync + 'static;

  fn pull(&mut self) -> Result<Pull, Self::Error>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  type Error = S::Error;

  fn pull(&mut self) -> Result<Pull, Self::Error> {
    (**self).pull()
  }
}

/// 将迭代器适配为帧源，`None` 表示暂无可用帧
pub struct IterSource<I> {
  inner: I,
}

impl<I> IterSource<I> {
  pub fn new(inner: I) -> Self {
    Self { inner }
  }
}

impl<I: Iterator<Item = Option<DynamicImage>>> FrameSource for IterSource<I> {
  type Error = Infallible;

  fn pull(&mut self) -> Result<Pull, Self::Error> {
    Ok(match self.inner.next() {
      Some(Some(image)) => Pull::Frame(image),
      Some(None) => Pull::Pending,
      None => Pull::End,
    })
  }
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSource for InputWrapper {
  type Error = InputError;

  fn pull(&mut self) -> Result<Pull, Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.pull().map_err(InputError::from),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.pull().map_err(InputError::from),
    }
  }
}
