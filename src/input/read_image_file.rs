// 该文件是 Beishan （北山） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("I/O error: {path}: {source}")]
  IoError {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("Image loading error: {path}: {source}")]
  ImageLoadError {
    path: String,
    #[source]
    source: image::ImageError,
  },
}

/// 单张图片输入
#[derive(Debug)]
pub struct ImageFileInput {
  image: RgbImage,
}

impl ImageFileInput {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let display = || path.display().to_string();

    let image = ImageReader::open(path)
      .map_err(|source| ImageFileInputError::IoError {
        path: display(),
        source,
      })?
      .with_guessed_format()
      .map_err(|source| ImageFileInputError::IoError {
        path: display(),
        source,
      })?
      .decode()
      .map_err(|source| ImageFileInputError::ImageLoadError {
        path: display(),
        source,
      })?
      .to_rgb8();

    info!(
      "读取图片 {}: {}x{}",
      path.display(),
      image.width(),
      image.height()
    );

    Ok(ImageFileInput { image })
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn decodes_to_rgb() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("in.png");
    let mut image = RgbImage::new(4, 3);
    image.put_pixel(1, 2, Rgb([1, 2, 3]));
    image.save(&path).unwrap();

    let image = ImageFileInput::open(&path).unwrap().into_image();
    assert_eq!(image.dimensions(), (4, 3));
    assert_eq!(*image.get_pixel(1, 2), Rgb([1, 2, 3]));
  }

  #[test]
  fn missing_file_reports_path() {
    let err = ImageFileInput::open("/nonexistent/beishan.png").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/beishan.png"));
  }

  #[test]
  fn undecodable_file_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.png");
    std::fs::write(&path, b"definitely not an image").unwrap();
    assert!(matches!(
      ImageFileInput::open(&path),
      Err(ImageFileInputError::ImageLoadError { .. })
    ));
  }
}
