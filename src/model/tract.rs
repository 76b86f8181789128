// 该文件是 Xunying （寻影） 项目的一部分。
// src/model/tract.rs - 基于 tract 的 ONNX 模型
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

use thiserror::Error;
use tracing::{debug, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{RGB_CHANNELS, Tensor},
  model::Model,
  preprocess::{REID_INPUT_H, REID_INPUT_W},
};

#[derive(Error, Debug)]
pub enum TractModelError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("模型参数无效: {0}")]
  InvalidParameter(String),
  #[error("模型加载错误: {path}: {source}")]
  ModelLoad {
    path: String,
    #[source]
    source: anyhow::Error,
  },
  #[error("无法确定模型输出维度, 请在 URL 中指定 dim 参数")]
  UnknownOutputDim,
  #[error("推理错误: {0}")]
  Inference(#[source] anyhow::Error),
  #[error("模型没有输出")]
  NoOutput,
}

pub struct TractModelBuilder {
  model_path: String,
  width: u32,
  height: u32,
  dim: Option<usize>,
}

impl FromUrlWithScheme for TractModelBuilder {
  const SCHEME: &'static str = "onnx";
}

fn parse_query<T: std::str::FromStr>(
  query: &HashMap<String, String>,
  key: &str,
) -> Result<Option<T>, TractModelError> {
  query
    .get(key)
    .map(|v| {
      v.parse::<T>()
        .map_err(|_| TractModelError::InvalidParameter(format!("{}={}", key, v)))
    })
    .transpose()
}

impl FromUrl for TractModelBuilder {
  type Error = TractModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TractModelError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let model_path = urlencoding::decode(url.path())
      .map_err(|e| TractModelError::InvalidParameter(format!("模型路径: {}", e)))?
      .into_owned();

    Ok(TractModelBuilder {
      model_path,
      width: parse_query(&query, "width")?.unwrap_or(REID_INPUT_W),
      height: parse_query(&query, "height")?.unwrap_or(REID_INPUT_H),
      dim: parse_query(&query, "dim")?,
    })
  }
}

impl TractModelBuilder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
      width: REID_INPUT_W,
      height: REID_INPUT_H,
      dim: None,
    }
  }

  pub fn width(mut self, width: u32) -> Self {
    self.width = width;
    self
  }

  pub fn height(mut self, height: u32) -> Self {
    self.height = height;
    self
  }

  pub fn dim(mut self, dim: usize) -> Self {
    self.dim = Some(dim);
    self
  }

  pub fn build(self) -> Result<TractModel, TractModelError> {
    if self.width == 0 || self.height == 0 {
      return Err(TractModelError::InvalidParameter(format!(
        "输入尺寸 {}x{}",
        self.width, self.height
      )));
    }

    info!("加载模型文件: {}", self.model_path);
    info!("模型输入尺寸: ({}, {})", self.width, self.height);

    let load_error = |source| TractModelError::ModelLoad {
      path: self.model_path.clone(),
      source,
    };

    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, RGB_CHANNELS, self.height as usize, self.width as usize),
          ),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(load_error)?;

    let declared_dim = plan
      .model()
      .output_fact(0)
      .ok()
      .and_then(|fact| fact.shape.as_concrete().map(|dims| dims.iter().product::<usize>()));
    debug!("模型声明的输出维度: {:?}", declared_dim);

    let output_len = match (self.dim, declared_dim) {
      (Some(dim), Some(declared)) if dim != declared => {
        return Err(TractModelError::InvalidParameter(format!(
          "dim={} 与模型输出维度 {} 不一致",
          dim, declared
        )));
      }
      (Some(dim), _) => dim,
      (None, Some(declared)) => declared,
      (None, None) => return Err(TractModelError::UnknownOutputDim),
    };

    info!("模型加载完成, 嵌入维度: {}", output_len);

    Ok(TractModel {
      plan,
      width: self.width,
      height: self.height,
      output_len,
    })
  }
}

/// ONNX 嵌入模型，输入 `[1, 3, H, W]` f32 张量
pub struct TractModel {
  plan: TypedRunnableModel<TypedModel>,
  width: u32,
  height: u32,
  output_len: usize,
}

impl FromUrl for TractModel {
  type Error = TractModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    TractModelBuilder::from_url(url)?.build()
  }
}

impl TractModel {
  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }
}

impl Model for TractModel {
  type Error = TractModelError;

  fn input_len(&self) -> usize {
    RGB_CHANNELS * self.width as usize * self.height as usize
  }

  fn output_len(&self) -> usize {
    self.output_len
  }

  fn infer(&self, input: &Tensor) -> Result<Vec<f32>, Self::Error> {
    let shape = input.shape();
    let array = tract_ndarray::Array4::from_shape_vec(
      (1, shape.channels, shape.height, shape.width),
      input.as_slice().to_vec(),
    )
    .map_err(|e| TractModelError::Inference(e.into()))?;

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(array.into_tensor().into()))
      .map_err(TractModelError::Inference)?;

    let output = outputs.first().ok_or(TractModelError::NoOutput)?;
    let view = output
      .to_array_view::<f32>()
      .map_err(TractModelError::Inference)?;

    Ok(view.iter().copied().collect())
  }
}
