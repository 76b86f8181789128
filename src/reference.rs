// 该文件是 Xunying （寻影） 项目的一部分。
// src/reference.rs - 参考嵌入集
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

use std::str::FromStr;

use image::DynamicImage;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  embedding::{EmbedError, Embedder, Embedding},
  model::Model,
  preprocess::{PreprocessError, Preprocessor},
};

#[derive(Error, Debug)]
pub enum ReferenceError {
  #[error("参考集为空")]
  Empty,
  #[error("重复的参考标签: {0}")]
  DuplicateLabel(String),
  #[error("参考 {0} 的嵌入向量为空")]
  EmptyEmbedding(String),
  #[error("参考 {label} 维度不匹配: 期望 {expected}, 实际 {actual}")]
  DimensionMismatch {
    label: String,
    expected: usize,
    actual: usize,
  },
  #[error("参考 {label} 预处理失败: {source}")]
  Preprocess {
    label: String,
    #[source]
    source: PreprocessError,
  },
  #[error("参考 {label} 嵌入失败: {source}")]
  Embed {
    label: String,
    #[source]
    source: EmbedError,
  },
  #[error("参考格式应为 LABEL=URL: {0}")]
  InvalidSpec(String),
  #[error("参考 URL 无效: {0}")]
  InvalidUrl(#[from] url::ParseError),
  #[error("参考图像读取失败: {0}")]
  Input(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 带标签的参考嵌入，按插入顺序保存，会话期间只读
#[derive(Debug, Clone)]
pub struct ReferenceSet {
  entries: Box<[(String, Embedding)]>,
  dim: usize,
}

impl ReferenceSet {
  pub fn builder() -> ReferenceSetBuilder {
    ReferenceSetBuilder::default()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// 所有参考向量的公共维度
  pub fn dim(&self) -> usize {
    self.dim
  }

  pub fn labels(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|(label, _)| label.as_str())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
    self
      .entries
      .iter()
      .map(|(label, embedding)| (label.as_str(), embedding))
  }

  pub fn get(&self, label: &str) -> Option<&Embedding> {
    self
      .entries
      .iter()
      .find(|(l, _)| l == label)
      .map(|(_, embedding)| embedding)
  }

  /// 用与查询帧相同的预处理和模型计算参考嵌入
  pub fn embed_images<M, I>(
    images: I,
    preprocessor: &Preprocessor,
    embedder: &Embedder<M>,
  ) -> Result<Self, ReferenceError>
  where
    M: Model,
    I: IntoIterator<Item = (String, DynamicImage)>,
  {
    let mut builder = Self::builder();
    for (label, image) in images {
      let tensor = match preprocessor.preprocess(&image) {
        Ok(tensor) => tensor,
        Err(source) => return Err(ReferenceError::Preprocess { label, source }),
      };
      let embedding = match embedder.embed(&tensor) {
        Ok(embedding) => embedding,
        Err(source) => return Err(ReferenceError::Embed { label, source }),
      };
      debug!("参考 {} 嵌入完成", label);
      builder = builder.insert(label, embedding)?;
    }
    builder.build()
  }

  /// 读取 `image:` URL 指向的参考图像并计算嵌入
  ///
  /// 单个文件以给定标签命名；目录中的每张图像命名为 `标签/文件名`。
  #[cfg(feature = "read_image_file")]
  pub fn load<M: Model>(
    specs: &[ReferenceSpec],
    preprocessor: &Preprocessor,
    embedder: &Embedder<M>,
  ) -> Result<Self, ReferenceError> {
    use crate::{
      FromUrl,
      input::{ImageFileInput, ImageFileInputError},
    };

    let input_error = |e: ImageFileInputError| ReferenceError::Input(Box::new(e));
    let mut images = Vec::new();
    for spec in specs {
      let input = ImageFileInput::from_url(&spec.url).map_err(input_error)?;
      if input.is_directory() {
        images.extend(
          input
            .read_all()
            .map_err(input_error)?
            .into_iter()
            .map(|(stem, image)| (format!("{}/{}", spec.label, stem), image)),
        );
      } else {
        images.extend(
          input
            .read_all()
            .map_err(input_error)?
            .into_iter()
            .map(|(_, image)| (spec.label.clone(), image)),
        );
      }
    }

    let references = Self::embed_images(images, preprocessor, embedder)?;
    info!(
      "加载 {} 个参考, 维度 {}",
      references.len(),
      references.dim()
    );
    Ok(references)
  }
}

#[derive(Debug, Default)]
pub struct ReferenceSetBuilder {
  entries: Vec<(String, Embedding)>,
}

impl ReferenceSetBuilder {
  pub fn insert(
    mut self,
    label: impl Into<String>,
    embedding: impl Into<Embedding>,
  ) -> Result<Self, ReferenceError> {
    let label = label.into();
    let embedding = embedding.into();

    if embedding.is_empty() {
      return Err(ReferenceError::EmptyEmbedding(label));
    }
    if self.entries.iter().any(|(l, _)| *l == label) {
      return Err(ReferenceError::DuplicateLabel(label));
    }
    if let Some((_, first)) = self.entries.first()
      && first.len() != embedding.len()
    {
      return Err(ReferenceError::DimensionMismatch {
        label,
        expected: first.len(),
        actual: embedding.len(),
      });
    }

    self.entries.push((label, embedding));
    Ok(self)
  }

  pub fn build(self) -> Result<ReferenceSet, ReferenceError> {
    let Some((_, first)) = self.entries.first() else {
      return Err(ReferenceError::Empty);
    };
    let dim = first.len();
    Ok(ReferenceSet {
      entries: self.entries.into_boxed_slice(),
      dim,
    })
  }
}

/// 命令行参考参数 `LABEL=URL`
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSpec {
  pub label: String,
  pub url: Url,
}

impl FromStr for ReferenceSpec {
  type Err = ReferenceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let Some((label, url)) = s.split_once('=') else {
      return Err(ReferenceError::InvalidSpec(s.to_string()));
    };
    let label = label.trim();
    if label.is_empty() {
      return Err(ReferenceError::InvalidSpec(s.to_string()));
    }
    Ok(ReferenceSpec {
      label: label.to_string(),
      url: Url::parse(url.trim())?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{frame::Tensor, model::FnModel, preprocess::Normalization};
  use image::{Rgb, RgbImage};

  #[derive(Error, Debug)]
  #[error("never")]
  struct Never;

  #[test]
  fn keeps_insertion_order() -> anyhow::Result<()> {
    let references = ReferenceSet::builder()
      .insert("B", [0.0f32, 1.0])?
      .insert("A", [1.0f32, 0.0])?
      .build()?;
    assert_eq!(references.labels().collect::<Vec<_>>(), ["B", "A"]);
    assert_eq!(references.dim(), 2);
    assert_eq!(
      references.get("A").map(Embedding::as_slice),
      Some(&[1.0, 0.0][..])
    );
    assert!(references.get("C").is_none());
    Ok(())
  }

  #[test]
  fn rejects_inconsistent_sets() -> anyhow::Result<()> {
    assert!(matches!(
      ReferenceSet::builder().build(),
      Err(ReferenceError::Empty)
    ));
    assert!(matches!(
      ReferenceSet::builder().insert("A", [1.0f32])?.insert("A", [2.0f32]),
      Err(ReferenceError::DuplicateLabel(label)) if label == "A"
    ));
    assert!(matches!(
      ReferenceSet::builder().insert("A", [1.0f32])?.insert("B", [1.0f32, 2.0]),
      Err(ReferenceError::DimensionMismatch {
        expected: 1,
        actual: 2,
        ..
      })
    ));
    assert!(matches!(
      ReferenceSet::builder().insert("A", Vec::<f32>::new()),
      Err(ReferenceError::EmptyEmbedding(_))
    ));
    Ok(())
  }

  #[test]
  fn embeds_images_through_the_pipeline() -> anyhow::Result<()> {
    let preprocessor = Preprocessor::new(2, 2, Normalization::IDENTITY)?;
    // 以第一个像素的红色通道作为一维嵌入
    let embedder = Embedder::new(FnModel::new(12, 1, |t: &Tensor| {
      Ok::<_, Never>(vec![t.as_slice()[0]])
    }));
    let images = vec![
      (
        "red".to_string(),
        DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([200, 0, 0]))),
      ),
      (
        "dark".to_string(),
        DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([10, 0, 0]))),
      ),
    ];

    let references = ReferenceSet::embed_images(images, &preprocessor, &embedder)?;
    assert_eq!(references.get("red").map(Embedding::as_slice), Some(&[200.0][..]));
    assert_eq!(references.get("dark").map(Embedding::as_slice), Some(&[10.0][..]));
    Ok(())
  }

  #[test]
  fn invalid_reference_image_names_its_label() -> anyhow::Result<()> {
    let preprocessor = Preprocessor::new(2, 2, Normalization::IDENTITY)?;
    let embedder = Embedder::new(FnModel::new(12, 1, |_: &Tensor| Ok::<_, Never>(vec![0.0])));
    let images = vec![("empty".to_string(), DynamicImage::new_rgb8(0, 0))];

    assert!(matches!(
      ReferenceSet::embed_images(images, &preprocessor, &embedder),
      Err(ReferenceError::Preprocess { label, .. }) if label == "empty"
    ));
    Ok(())
  }

  #[test]
  fn parses_label_and_url() -> anyhow::Result<()> {
    let spec: ReferenceSpec = "alice=image:///data/alice.jpg".parse()?;
    assert_eq!(spec.label, "alice");
    assert_eq!(spec.url.scheme(), "image");
    assert_eq!(spec.url.path(), "/data/alice.jpg");

    assert!(matches!(
      "image:///data/alice.jpg".parse::<ReferenceSpec>(),
      Err(ReferenceError::InvalidSpec(_))
    ));
    assert!(matches!(
      "=image:///x.jpg".parse::<ReferenceSpec>(),
      Err(ReferenceError::InvalidSpec(_))
    ));
    Ok(())
  }

  #[cfg(feature = "read_image_file")]
  #[test]
  fn loads_files_and_directories() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let gallery = dir.path().join("gallery");
    std::fs::create_dir(&gallery)?;
    RgbImage::from_pixel(2, 2, Rgb([30, 0, 0])).save(gallery.join("front.png"))?;
    RgbImage::from_pixel(2, 2, Rgb([60, 0, 0])).save(gallery.join("side.png"))?;
    let single = dir.path().join("single.png");
    RgbImage::from_pixel(2, 2, Rgb([90, 0, 0])).save(&single)?;

    let specs = vec![
      format!("solo=image://{}", single.display()).parse::<ReferenceSpec>()?,
      format!("bob=image://{}", gallery.display()).parse::<ReferenceSpec>()?,
    ];
    let preprocessor = Preprocessor::new(2, 2, Normalization::IDENTITY)?;
    let embedder = Embedder::new(FnModel::new(12, 1, |t: &Tensor| {
      Ok::<_, Never>(vec![t.as_slice()[0]])
    }));

    let references = ReferenceSet::load(&specs, &preprocessor, &embedder)?;
    assert_eq!(
      references.labels().collect::<Vec<_>>(),
      ["solo", "bob/front", "bob/side"]
    );
    assert_eq!(references.get("bob/side").map(Embedding::as_slice), Some(&[60.0][..]));
    Ok(())
  }
}
