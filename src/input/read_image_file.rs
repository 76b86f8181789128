// 该文件是 Xunying （寻影） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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
  collections::VecDeque,
  path::{Path, PathBuf},
};

use image::{DynamicImage, ImageReader};
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{FrameSource, Pull},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("Invalid path: {0}")]
  InvalidPath(String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {path}: {source}")]
  ImageLoadError {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
}

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

fn is_image_file(path: &Path) -> bool {
  path.is_file()
    && path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
      .unwrap_or(false)
}

fn decode(path: &Path) -> Result<DynamicImage, ImageFileInputError> {
  let load_error = |source| ImageFileInputError::ImageLoadError {
    path: path.to_path_buf(),
    source,
  };
  ImageReader::open(path)?
    .with_guessed_format()?
    .decode()
    .map_err(load_error)
}

/// 单个图像文件或图像目录（按文件名排序）
pub struct ImageFileInput {
  root: PathBuf,
  is_directory: bool,
  pending: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| ImageFileInputError::InvalidPath(e.to_string()))?;
    Self::open(path.as_ref())
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let root = path.as_ref().to_path_buf();

    if root.is_dir() {
      let mut files = std::fs::read_dir(&root)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
      files.retain(|p| is_image_file(p));
      files.sort();
      debug!("目录 {} 中共有 {} 张图像", root.display(), files.len());

      return Ok(ImageFileInput {
        root,
        is_directory: true,
        pending: files.into(),
      });
    }

    if !root.is_file() {
      return Err(ImageFileInputError::InvalidPath(
        root.display().to_string(),
      ));
    }

    Ok(ImageFileInput {
      pending: VecDeque::from([root.clone()]),
      root,
      is_directory: false,
    })
  }

  pub fn is_directory(&self) -> bool {
    self.is_directory
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn remaining(&self) -> usize {
    self.pending.len()
  }

  /// 读取剩余全部图像，以文件名（不含扩展名）标注；任何解码错误都会中止
  pub fn read_all(self) -> Result<Vec<(String, DynamicImage)>, ImageFileInputError> {
    self
      .pending
      .into_iter()
      .map(|path| {
        let stem = path
          .file_stem()
          .map(|s| s.to_string_lossy().into_owned())
          .unwrap_or_default();
        decode(&path).map(|image| (stem, image))
      })
      .collect()
  }
}

impl FrameSource for ImageFileInput {
  type Error = ImageFileInputError;

  fn pull(&mut self) -> Result<Pull, Self::Error> {
    let Some(path) = self.pending.pop_front() else {
      return Ok(Pull::End);
    };

    debug!("读取图像文件: {}", path.display());
    match decode(&path) {
      Ok(image) => Ok(Pull::Frame(image)),
      Err(e) => {
        let reason = format!("无法解码图像 {}: {}", path.display(), e);
        warn!("{}", reason);
        Ok(Pull::Invalid(reason))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn write_image(dir: &Path, name: &str, color: [u8; 3]) -> anyhow::Result<()> {
    RgbImage::from_pixel(4, 2, Rgb(color)).save(dir.join(name))?;
    Ok(())
  }

  #[test]
  fn directory_is_read_in_name_order() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_image(dir.path(), "b.png", [0, 255, 0])?;
    write_image(dir.path(), "a.png", [255, 0, 0])?;
    std::fs::write(dir.path().join("notes.txt"), "not an image")?;

    let url = Url::from_directory_path(dir.path()).map_err(|_| anyhow::anyhow!("bad path"))?;
    let url = Url::parse(&format!("image://{}", url.path()))?;
    let mut input = ImageFileInput::from_url(&url)?;
    assert!(input.is_directory());
    assert_eq!(input.remaining(), 2);

    let Pull::Frame(first) = input.pull()? else {
      anyhow::bail!("expected a frame");
    };
    assert_eq!(first.to_rgb8().get_pixel(0, 0), &Rgb([255, 0, 0]));
    assert!(matches!(input.pull()?, Pull::Frame(_)));
    assert!(matches!(input.pull()?, Pull::End));
    Ok(())
  }

  #[test]
  fn undecodable_file_is_reported_with_its_reason() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("broken.jpg"), b"definitely not a jpeg")?;
    write_image(dir.path(), "fine.png", [7, 8, 9])?;

    let mut input = ImageFileInput::open(dir.path())?;
    let Pull::Invalid(reason) = input.pull()? else {
      anyhow::bail!("expected an invalid frame");
    };
    assert!(reason.contains("broken.jpg"));
    assert!(matches!(input.pull()?, Pull::Frame(_)));
    assert!(matches!(input.pull()?, Pull::End));
    Ok(())
  }

  #[test]
  fn read_all_labels_by_file_stem() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_image(dir.path(), "alice.png", [1, 2, 3])?;
    write_image(dir.path(), "bob.png", [4, 5, 6])?;

    let labelled = ImageFileInput::open(dir.path())?.read_all()?;
    let labels: Vec<_> = labelled.iter().map(|(label, _)| label.as_str()).collect();
    assert_eq!(labels, ["alice", "bob"]);
    Ok(())
  }

  #[test]
  fn missing_path_is_rejected() {
    assert!(matches!(
      ImageFileInput::open("/nonexistent/xunying/frames"),
      Err(ImageFileInputError::InvalidPath(_))
    ));
  }
}
