// 该文件是 Beishan （北山） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone)]
pub struct SaveImageFileOutput {
  path: PathBuf,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {path}: {source}")]
  IoError {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("图像错误: {path}: {source}")]
  ImageError {
    path: String,
    #[source]
    source: image::ImageError,
  },
}

impl SaveImageFileOutput {
  pub fn new<P: Into<PathBuf>>(path: P) -> Self {
    Self { path: path.into() }
  }

  pub fn save(&self, image: &RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|source| SaveImageFileError::IoError {
        path: parent.display().to_string(),
        source,
      })?;
    }

    image
      .save(&self.path)
      .map_err(|source| SaveImageFileError::ImageError {
        path: self.path.display().to_string(),
        source,
      })?;

    info!("保存图像到文件: {}", self.path.display());

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/out/result.png");
    let mut image = RgbImage::new(3, 3);
    image.put_pixel(2, 2, Rgb([9, 8, 7]));

    SaveImageFileOutput::new(&path).save(&image).unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(*saved.get_pixel(2, 2), Rgb([9, 8, 7]));
  }

  #[test]
  fn unknown_extension_is_an_image_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = SaveImageFileOutput::new(dir.path().join("result.unknown"));
    assert!(matches!(
      output.save(&RgbImage::new(1, 1)),
      Err(SaveImageFileError::ImageError { .. })
    ));
  }
}
