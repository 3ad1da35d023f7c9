// 该文件是 Beishan （北山） 项目的一部分。
// src/model/labels.rs - 类别标签表
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use thiserror::Error;
use tracing::info;

/// PASCAL VOC 数据集类别名称（不含背景）
pub const VOC_CLASSES: [&str; 20] = [
  "aeroplane",
  "bicycle",
  "bird",
  "boat",
  "bottle",
  "bus",
  "car",
  "cat",
  "chair",
  "cow",
  "diningtable",
  "dog",
  "horse",
  "motorbike",
  "person",
  "pottedplant",
  "sheep",
  "sofa",
  "train",
  "tvmonitor",
];

#[derive(Error, Debug)]
pub enum LabelMapError {
  #[error("无法读取标签文件 {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("标签文件为空: {0}")]
  Empty(String),
}

/// 类别标签表
///
/// 模型输出的类别 0 为背景，类别 `c`（`c >= 1`）对应 `names[c - 1]`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
  names: Vec<String>,
}

impl Default for LabelMap {
  fn default() -> Self {
    Self::voc()
  }
}

impl LabelMap {
  pub fn voc() -> Self {
    Self::new(VOC_CLASSES.iter().map(|s| s.to_string()).collect())
  }

  pub fn new(names: Vec<String>) -> Self {
    Self { names }
  }

  /// 每行一个类别名称，忽略空行
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LabelMapError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| LabelMapError::Io {
      path: path.display().to_string(),
      source,
    })?;

    let names: Vec<String> = content
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(String::from)
      .collect();

    if names.is_empty() {
      return Err(LabelMapError::Empty(path.display().to_string()));
    }

    info!("从 {} 加载了 {} 个类别标签", path.display(), names.len());
    Ok(Self::new(names))
  }

  /// 按模型类别索引查找名称，背景和越界索引返回 `None`
  pub fn name(&self, class_index: usize) -> Option<&str> {
    class_index
      .checked_sub(1)
      .and_then(|i| self.names.get(i))
      .map(String::as_str)
  }

  /// 包含背景在内的类别数
  pub fn num_classes(&self) -> usize {
    self.names.len() + 1
  }
}
