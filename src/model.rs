// 该文件是 Beishan （北山） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use thiserror::Error;

/// 检测模型
///
/// 实现者须保证 `infer` 返回的每个类别的候选框按置信度降序排列，
/// 标注流程依赖这一顺序在遇到第一个低于阈值的候选框时停止扫描。
pub trait Model {
  type Input;
  type Error: std::error::Error + Send + Sync + 'static;

  /// 模型期望的输入尺寸 (宽, 高)
  fn input_size(&self) -> (u32, u32);
  fn preprocess(&self, frame: &RgbImage) -> Result<Self::Input, Self::Error>;
  fn infer(&self, input: &Self::Input) -> Result<DetectionBatch, Self::Error>;
}

impl<M: Model + ?Sized> Model for &M {
  type Input = M::Input;
  type Error = M::Error;

  fn input_size(&self) -> (u32, u32) {
    (**self).input_size()
  }

  fn preprocess(&self, frame: &RgbImage) -> Result<Self::Input, Self::Error> {
    (**self).preprocess(frame)
  }

  fn infer(&self, input: &Self::Input) -> Result<DetectionBatch, Self::Error> {
    (**self).infer(input)
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectItem {
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，归一化坐标
}

/// 每行的元素个数: (score, x0, y0, x1, y1)
pub const DETECTION_ROW_LEN: usize = 5;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("models output shape mismatch: expected [1, classes, top_k, 5], got {shape:?}")]
pub struct ShapeMismatch {
  pub shape: Vec<usize>,
}

/// 单帧的检测结果，按类别索引组织
#[derive(Debug, Clone, Default)]
pub struct DetectionBatch {
  classes: Box<[Box<[DetectItem]>]>,
}

impl DetectionBatch {
  pub fn new(classes: Vec<Vec<DetectItem>>) -> Self {
    Self {
      classes: classes
        .into_iter()
        .map(Vec::into_boxed_slice)
        .collect::<Vec<_>>()
        .into_boxed_slice(),
    }
  }

  /// 从原始输出张量构造，张量形状必须为 `[1, C, K, 5]`
  pub fn from_raw(shape: &[usize], data: &[f32]) -> Result<Self, ShapeMismatch> {
    let mismatch = || ShapeMismatch {
      shape: shape.to_vec(),
    };

    let &[batch, num_classes, top_k, row] = shape else {
      return Err(mismatch());
    };
    if batch != 1 || row != DETECTION_ROW_LEN {
      return Err(mismatch());
    }
    if num_classes * top_k * row != data.len() {
      return Err(mismatch());
    }

    // chunks_exact 不接受长度 0
    if top_k == 0 {
      return Ok(Self::new(vec![Vec::new(); num_classes]));
    }

    let classes = data
      .chunks_exact(top_k * row)
      .map(|class| {
        class
          .chunks_exact(row)
          .map(|r| DetectItem {
            score: r[0],
            bbox: [r[1], r[2], r[3], r[4]],
          })
          .collect::<Vec<_>>()
      })
      .collect::<Vec<_>>();

    Ok(Self::new(classes))
  }

  pub fn num_classes(&self) -> usize {
    self.classes.len()
  }

  pub fn class(&self, index: usize) -> &[DetectItem] {
    self.classes.get(index).map(|c| &c[..]).unwrap_or(&[])
  }

  pub fn iter(&self) -> impl Iterator<Item = (usize, &[DetectItem])> {
    self.classes.iter().enumerate().map(|(i, c)| (i, &c[..]))
  }
}

mod labels;
pub use self::labels::{LabelMap, LabelMapError, VOC_CLASSES};

#[cfg(feature = "model_ssd")]
mod ssd;
#[cfg(feature = "model_ssd")]
pub use self::ssd::{Phase, Ssd, SsdBuilder, SsdError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builds_batch_from_raw_tensor() {
    #[rustfmt::skip]
    let data = [
      // background
      0.9, 0.0, 0.0, 1.0, 1.0,
      0.0, 0.0, 0.0, 0.0, 0.0,
      // class 1
      0.8, 0.1, 0.2, 0.3, 0.4,
      0.7, 0.5, 0.6, 0.7, 0.8,
    ];
    let batch = DetectionBatch::from_raw(&[1, 2, 2, 5], &data).unwrap();

    assert_eq!(batch.num_classes(), 2);
    assert_eq!(batch.class(1).len(), 2);
    assert_eq!(
      batch.class(1)[1],
      DetectItem {
        score: 0.7,
        bbox: [0.5, 0.6, 0.7, 0.8]
      }
    );
    assert!(batch.class(7).is_empty());
  }

  #[test]
  fn rejects_wrong_rank_and_row_length() {
    assert_eq!(
      DetectionBatch::from_raw(&[2, 5], &[0.0; 10]).unwrap_err(),
      ShapeMismatch { shape: vec![2, 5] }
    );
    assert!(DetectionBatch::from_raw(&[1, 1, 2, 4], &[0.0; 8]).is_err());
    assert!(DetectionBatch::from_raw(&[2, 1, 1, 5], &[0.0; 10]).is_err());
  }

  #[test]
  fn rejects_data_length_mismatch() {
    assert!(DetectionBatch::from_raw(&[1, 2, 2, 5], &[0.0; 19]).is_err());
  }

  #[test]
  fn empty_top_k_keeps_class_count() {
    let batch = DetectionBatch::from_raw(&[1, 3, 0, 5], &[]).unwrap();
    assert_eq!(batch.num_classes(), 3);
    assert!(batch.iter().all(|(_, items)| items.is_empty()));
  }
}
