// 该文件是 Xunying （寻影） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 支持摄像头（V4L2）与视频文件两种来源：
//!
//! - `gst://camera/dev/video0?width=640&height=480&fps=15`
//! - `gst://file/path/to/video.mp4`
//!
//! 可选查询参数 `rotate`（0/90/180/270）与 `timeout-ms`（单次拉取的最长等待时间，
//! 默认 100 毫秒）。拉取超时返回 [`Pull::Pending`]，保证上层能及时响应取消信号。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::{DynamicImage, RgbImage};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{FrameSource, Pull},
};

const DEFAULT_PULL_TIMEOUT_MS: u64 = 100;
const DEFAULT_CAMERA_W: u32 = 640;
const DEFAULT_CAMERA_H: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 15;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
    direction: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = if let Some(mode) = io_mode {
          format!(" io-mode={}", mode)
        } else {
          "".to_string()
        };
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode_str, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip { method, direction } => {
        format!("videoflip method={} video-direction={}", method, direction)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  timeout_ms: u64,
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl GStreamerInputPipelineBuilder {
  fn build_camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let parse = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    let mut items = vec![GStreamerInputBuilderItem::CameraSource {
      camera: path.to_string(),
      io_mode: query.get("io-mode").and_then(|v| v.parse::<u32>().ok()),
      format: query
        .get("format")
        .cloned()
        .unwrap_or_else(|| String::from("YUY2")),
      width: parse("width", DEFAULT_CAMERA_W),
      height: parse("height", DEFAULT_CAMERA_H),
      fps: parse("fps", DEFAULT_CAMERA_FPS),
    }];
    items.extend(Self::video_flip(query.get("rotate").map(|s| s.as_ref())));

    GStreamerInputPipelineBuilder {
      items,
      timeout_ms: DEFAULT_PULL_TIMEOUT_MS,
    }
  }

  fn build_file_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let mut items = vec![GStreamerInputBuilderItem::FileSource(path.to_string())];
    items.extend(Self::video_flip(query.get("rotate").map(|s| s.as_ref())));

    GStreamerInputPipelineBuilder {
      items,
      timeout_ms: DEFAULT_PULL_TIMEOUT_MS,
    }
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    let (method, direction) = match rotate? {
      "90" => (1, 1),
      "180" => (2, 2),
      "270" => (3, 3),
      _ => return None,
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method, direction })
  }

  pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = timeout_ms;
    self
  }

  pub fn pipeline_description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! appsink max-buffers=2 drop=true name=sink",
      basic_pipeline
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.pipeline_description();
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      timeout: gst::ClockTime::from_mseconds(self.timeout_ms),
    })
  }
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let path = urlencoding::decode(url.path())
      .map_err(|e| GStreamerInputError::PipelineError(e.to_string()))?;

    let mut builder = match url.host_str() {
      Some("camera") => Self::build_camera_pipeline(&path, &query),
      Some("file") => Self::build_file_pipeline(&path, &query),
      _ => {
        return Err(GStreamerInputError::SchemeMismatch);
      }
    };

    builder.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });

    if let Some(timeout_ms) = query.get("timeout-ms").and_then(|v| v.parse::<u64>().ok()) {
      builder.timeout_ms = timeout_ms;
    }

    Ok(builder)
  }
}

/// GStreamer 视频输入
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  timeout: gst::ClockTime,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl FrameSource for GStreamerInput {
  type Error = GStreamerInputError;

  fn pull(&mut self) -> Result<Pull, Self::Error> {
    if self.appsink.is_eos() {
      return Ok(Pull::End);
    }

    match self.appsink.try_pull_sample(self.timeout) {
      Some(sample) => frame_or_invalid(convert_sample(sample)),
      None if self.appsink.is_eos() => {
        info!("GStreamer 输入流结束");
        Ok(Pull::End)
      }
      None => {
        debug!("暂无可用帧");
        Ok(Pull::Pending)
      }
    }
  }
}

/// 单个缓冲区损坏只跳过该帧；像素格式不受支持则每帧都会失败，直接终止
fn frame_or_invalid(
  converted: Result<DynamicImage, GStreamerInputError>,
) -> Result<Pull, GStreamerInputError> {
  match converted {
    Ok(image) => Ok(Pull::Frame(image)),
    Err(GStreamerInputError::UnsupportedFormat) => Err(GStreamerInputError::UnsupportedFormat),
    Err(e) => {
      warn!("无法转换 GStreamer 帧: {}", e);
      Ok(Pull::Invalid(e.to_string()))
    }
  }
}

fn convert_sample(sample: gst::Sample) -> Result<DynamicImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let row_len = width * 3;
  let expected_size = stride * height.saturating_sub(1) + row_len;
  if height == 0 || data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row_len * height);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for row in data.chunks(stride).take(height) {
        pixels.extend_from_slice(&row[..row_len]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for row in data.chunks(stride).take(height) {
        for bgr in row[..row_len].chunks_exact(3) {
          pixels.extend_from_slice(&[bgr[2], bgr[1], bgr[0]]);
        }
      }
    }
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  }

  RgbImage::from_raw(width as u32, height as u32, pixels)
    .map(DynamicImage::ImageRgb8)
    .ok_or(GStreamerInputError::BufferSizeMismatch {
      expected: row_len * height,
      actual: data.len(),
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn camera_url_builds_v4l2_pipeline() -> anyhow::Result<()> {
    let url = Url::parse("gst://camera/dev/video2?width=320&height=240&fps=30&rotate=180")?;
    let builder = GStreamerInputPipelineBuilder::from_url(&url)?;
    assert_eq!(
      builder.pipeline_description(),
      "v4l2src device=/dev/video2 ! video/x-raw,format=YUY2,width=320,height=240,framerate=30/1 \
       ! videoflip method=2 video-direction=2 ! videoconvert ! video/x-raw,format=RGB \
       ! appsink max-buffers=2 drop=true name=sink"
    );
    assert_eq!(builder.timeout_ms, DEFAULT_PULL_TIMEOUT_MS);
    Ok(())
  }

  #[test]
  fn file_url_builds_decode_pipeline() -> anyhow::Result<()> {
    let url = Url::parse("gst://file/videos/walk.mp4?timeout-ms=250")?;
    let builder = GStreamerInputPipelineBuilder::from_url(&url)?;
    assert!(
      builder
        .pipeline_description()
        .starts_with("filesrc location=/videos/walk.mp4 ! decodebin ! videoconvert")
    );
    assert_eq!(builder.timeout_ms, 250);
    Ok(())
  }

  #[test]
  fn malformed_buffer_is_an_invalid_frame() {
    let pulled = frame_or_invalid(Err(GStreamerInputError::BufferSizeMismatch {
      expected: 640 * 480 * 3,
      actual: 1024,
    }));
    assert!(matches!(pulled, Ok(Pull::Invalid(reason)) if reason.contains("1024")));

    let pulled = frame_or_invalid(Err(GStreamerInputError::VideoInfoError));
    assert!(matches!(pulled, Ok(Pull::Invalid(_))));
  }

  #[test]
  fn unsupported_format_stays_fatal() {
    assert!(matches!(
      frame_or_invalid(Err(GStreamerInputError::UnsupportedFormat)),
      Err(GStreamerInputError::UnsupportedFormat)
    ));
    assert!(matches!(
      frame_or_invalid(Ok(DynamicImage::new_rgb8(2, 2))),
      Ok(Pull::Frame(_))
    ));
  }

  #[test]
  fn unknown_host_is_rejected() -> anyhow::Result<()> {
    let url = Url::parse("gst://network/stream")?;
    assert!(matches!(
      GStreamerInputPipelineBuilder::from_url(&url),
      Err(GStreamerInputError::SchemeMismatch)
    ));
    Ok(())
  }
}
