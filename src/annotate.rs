// 该文件是 Beishan （北山） 项目的一部分。
// src/annotate.rs - 单帧检测与标注
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  model::{DetectionBatch, LabelMap, Model},
  output::draw::{Draw, Overlay},
};

/// 候选框被绘制所需的最低置信度（含）
pub const THRESHOLD: f32 = 0.6;

#[derive(Error, Debug)]
pub enum AnnotateError {
  #[error("模型错误: {0}")]
  Model(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("类别 {class_index} 没有对应的标签（标签表共 {num_labels} 项）")]
  LabelOutOfRange {
    class_index: usize,
    num_labels: usize,
  },
}

impl AnnotateError {
  fn model<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    AnnotateError::Model(Box::new(e))
  }
}

/// 帧标注器：推理、按阈值筛选并在原帧上绘制检测结果
pub struct Annotator<M> {
  model: M,
  labels: LabelMap,
  draw: Draw,
}

impl<M: Model> Annotator<M> {
  pub fn new(model: M) -> Self {
    Self {
      model,
      labels: LabelMap::default(),
      draw: Draw::default(),
    }
  }

  pub fn with_labels(mut self, labels: LabelMap) -> Self {
    self.labels = labels;
    self
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  /// 在 `frame` 上原地绘制检测结果，返回已绘制的内容
  pub fn annotate(&self, frame: &mut RgbImage) -> Result<Vec<Overlay>, AnnotateError> {
    let (width, height) = frame.dimensions();

    let input = self.model.preprocess(frame).map_err(AnnotateError::model)?;
    let batch = self.model.infer(&input).map_err(AnnotateError::model)?;

    let overlays = self.select(&batch, width, height)?;
    for overlay in &overlays {
      self.draw.render(frame, overlay);
    }
    debug!("绘制了 {} 个检测结果", overlays.len());

    Ok(overlays)
  }

  /// 与 [`Annotator::annotate`] 相同，但转移并返回同一个帧缓冲
  pub fn annotate_owned(&self, mut frame: RgbImage) -> Result<RgbImage, AnnotateError> {
    self.annotate(&mut frame)?;
    Ok(frame)
  }

  fn select(
    &self,
    batch: &DetectionBatch,
    width: u32,
    height: u32,
  ) -> Result<Vec<Overlay>, AnnotateError> {
    let mut overlays = Vec::new();

    // 类别 0 为背景
    for (class_index, items) in batch.iter().skip(1) {
      for item in items {
        // 每个类别的候选框按置信度降序排列
        if item.score.is_nan() || item.score < THRESHOLD {
          break;
        }

        let name = self
          .labels
          .name(class_index)
          .ok_or(AnnotateError::LabelOutOfRange {
            class_index,
            num_labels: self.labels.num_classes() - 1,
          })?;

        if let Some(overlay) =
          self
            .draw
            .overlay(class_index, name, item.score, &item.bbox, width, height)
        {
          overlays.push(overlay);
        }
      }
    }

    Ok(overlays)
  }
}
