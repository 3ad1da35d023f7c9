// 该文件是 Beishan （北山） 项目的一部分。
// src/model/ssd.rs - SSD300 检测模型（tract-onnx 推理）
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::NchwTensor,
  model::{DetectionBatch, Model, ShapeMismatch},
};

const SSD_INPUT_SIZE: u32 = 300;
const SSD_NUM_INPUTS: usize = 1;
const SSD_NUM_OUTPUTS: usize = 1;
// 与训练时的 BaseTransform 保持一致，直接从 0..255 的原始像素值中减去
const SSD_MEAN: [f32; 3] = [104.0 / 256.0, 117.0 / 256.0, 123.0 / 256.0];

#[derive(Error, Debug)]
pub enum SsdError {
  #[error("模型加载错误: {path}: {reason}")]
  ModelLoad { path: String, reason: String },
  #[error("模型路径错误: {0}")]
  ModelPath(String),
  #[error("输入帧无效: {0}")]
  InvalidFrame(String),
  #[error("推理错误: {0}")]
  Inference(String),
  #[error(transparent)]
  ShapeMismatch(#[from] ShapeMismatch),
}

impl SsdError {
  fn load(path: &Path, e: impl std::fmt::Display) -> Self {
    SsdError::ModelLoad {
      path: path.display().to_string(),
      reason: e.to_string(),
    }
  }
}

/// 模型运行阶段，构造后不可更改
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Inference,
}

pub struct Ssd {
  plan: TypedRunnableModel<TypedModel>,
  size: u32,
  mean: [f32; 3],
  phase: Phase,
}

impl std::fmt::Debug for Ssd {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Ssd")
      .field("size", &self.size)
      .field("mean", &self.mean)
      .field("phase", &self.phase)
      .finish_non_exhaustive()
  }
}

#[derive(Debug, Clone)]
pub struct SsdBuilder {
  weights: PathBuf,
  size: u32,
  mean: [f32; 3],
}

impl FromUrlWithScheme for SsdBuilder {
  const SCHEME: &'static str = "ssd";
}

impl FromUrl for SsdBuilder {
  type Error = SsdError;

  /// 支持 `ssd:///path/to/weights.onnx?size=300&mean=104,117,123` 以及 `file://` 路径
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME && url.scheme() != "file" {
      return Err(SsdError::ModelPath(format!(
        "模型路径必须使用 {} 或 file 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut builder = SsdBuilder::new(url.path());
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "size" => {
          let size = value
            .parse::<u32>()
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| SsdError::ModelPath(format!("无效的输入尺寸: {}", value)))?;
          builder = builder.size(size);
        }
        "mean" => {
          let parts = value
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| SsdError::ModelPath(format!("无效的均值: {}", value)))?;
          let mean: [f32; 3] = parts
            .try_into()
            .map_err(|_| SsdError::ModelPath(format!("均值必须包含 3 个分量: {}", value)))?;
          builder = builder.mean(mean);
        }
        other => debug!("忽略未知的模型参数: {}", other),
      }
    }

    Ok(builder)
  }
}

impl SsdBuilder {
  pub fn new<P: Into<PathBuf>>(weights: P) -> Self {
    Self {
      weights: weights.into(),
      size: SSD_INPUT_SIZE,
      mean: SSD_MEAN,
    }
  }

  pub fn size(mut self, size: u32) -> Self {
    self.size = size;
    self
  }

  pub fn mean(mut self, mean: [f32; 3]) -> Self {
    self.mean = mean;
    self
  }

  pub fn weights(&self) -> &Path {
    &self.weights
  }

  pub fn build(self) -> Result<Ssd, SsdError> {
    let path = self.weights.as_path();
    info!("加载模型文件: {}", path.display());

    let metadata = std::fs::metadata(path).map_err(|e| SsdError::load(path, e))?;
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    let size = self.size as usize;
    let model = tract_onnx::onnx()
      .model_for_path(path)
      .map_err(|e| SsdError::load(path, format!("{:#}", e)))?;

    let num_inputs = model.inputs.len();
    let num_outputs = model.outputs.len();
    if num_inputs != SSD_NUM_INPUTS || num_outputs != SSD_NUM_OUTPUTS {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        SSD_NUM_INPUTS, SSD_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(SsdError::load(
        path,
        format!(
          "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
          SSD_NUM_INPUTS, SSD_NUM_OUTPUTS, num_inputs, num_outputs
        ),
      ));
    }

    info!("优化推理计划，输入尺寸 {}x{}", size, size);
    let plan = model
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
      )
      .and_then(|m| m.into_optimized())
      .and_then(|m| m.into_runnable())
      .map_err(|e| SsdError::load(path, format!("{:#}", e)))?;
    info!("模型加载完成");

    Ok(Ssd {
      plan,
      size: self.size,
      mean: self.mean,
      phase: Phase::Inference,
    })
  }
}

impl Ssd {
  pub fn phase(&self) -> Phase {
    self.phase
  }
}

impl Model for Ssd {
  type Input = NchwTensor;
  type Error = SsdError;

  fn input_size(&self) -> (u32, u32) {
    (self.size, self.size)
  }

  fn preprocess(&self, frame: &RgbImage) -> Result<Self::Input, Self::Error> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
      return Err(SsdError::InvalidFrame(format!(
        "帧尺寸为 {}x{}",
        width, height
      )));
    }

    let resized = image::imageops::resize(frame, self.size, self.size, FilterType::Triangle);
    Ok(NchwTensor::from_rgb_image(&resized, self.mean))
  }

  fn infer(&self, input: &Self::Input) -> Result<DetectionBatch, Self::Error> {
    let expected = [1, 3, self.size as usize, self.size as usize];
    if input.shape() != expected {
      return Err(SsdError::InvalidFrame(format!(
        "输入张量形状 {:?} 与模型 {:?} 不符",
        input.shape(),
        expected
      )));
    }

    debug!("执行模型推理");
    let tensor = Tensor::from_shape(&expected, input.as_slice())
      .map_err(|e| SsdError::Inference(format!("{:#}", e)))?;
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| SsdError::Inference(format!("{:#}", e)))?;

    let output = outputs
      .first()
      .ok_or_else(|| SsdError::Inference("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(|e| SsdError::Inference(format!("{:#}", e)))?;
    debug!("模型输出形状: {:?}", view.shape());

    let data: Vec<f32> = view.iter().copied().collect();
    Ok(DetectionBatch::from_raw(view.shape(), &data)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_locator_with_parameters() {
    let url = Url::parse("ssd:///weights/ssd300.onnx?size=512&mean=1,2,3").unwrap();
    let builder = SsdBuilder::from_url(&url).unwrap();
    assert_eq!(builder.weights(), Path::new("/weights/ssd300.onnx"));
    assert_eq!(builder.size, 512);
    assert_eq!(builder.mean, [1.0, 2.0, 3.0]);
  }

  #[test]
  fn file_scheme_uses_defaults() {
    let url = Url::parse("file:///weights/ssd300.onnx").unwrap();
    let builder = SsdBuilder::from_url(&url).unwrap();
    assert_eq!(builder.size, SSD_INPUT_SIZE);
    assert_eq!(builder.mean, SSD_MEAN);
  }

  #[test]
  fn rejects_foreign_scheme_and_bad_mean() {
    let url = Url::parse("http://example.com/ssd.onnx").unwrap();
    assert!(matches!(
      SsdBuilder::from_url(&url),
      Err(SsdError::ModelPath(_))
    ));

    let url = Url::parse("ssd:///ssd.onnx?mean=1,2").unwrap();
    assert!(matches!(
      SsdBuilder::from_url(&url),
      Err(SsdError::ModelPath(_))
    ));
  }

  #[test]
  fn missing_weights_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SsdBuilder::new(dir.path().join("missing.onnx"))
      .build()
      .unwrap_err();
    match err {
      SsdError::ModelLoad { path, .. } => assert!(path.ends_with("missing.onnx")),
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn garbage_weights_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.onnx");
    std::fs::write(&path, b"not a model").unwrap();
    assert!(matches!(
      SsdBuilder::new(&path).build(),
      Err(SsdError::ModelLoad { .. })
    ));
  }
}
