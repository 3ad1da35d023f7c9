// 该文件是 Beishan （北山） 项目的一部分。
// src/frame.rs - 帧、帧率与 NCHW 张量定义
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

use std::{fmt, str::FromStr};

use image::RgbImage;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

/// 输入源产生的一帧图像
#[derive(Debug, Clone)]
pub struct Frame {
  /// 帧序号（从 0 开始，按到达顺序递增）
  pub index: u64,
  /// RGB 图像数据
  pub image: RgbImage,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameRateError {
  #[error("帧率格式无效: {0}")]
  Malformed(String),
  #[error("帧率必须为正数: {0}")]
  NotPositive(String),
}

/// 有理数帧率 `num/den`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
  num: u32,
  den: u32,
}

impl FrameRate {
  pub fn new(num: u32, den: u32) -> Result<Self, FrameRateError> {
    if num == 0 || den == 0 {
      return Err(FrameRateError::NotPositive(format!("{}/{}", num, den)));
    }
    Ok(Self { num, den })
  }

  pub const fn integer(fps: u32) -> Self {
    Self { num: fps, den: 1 }
  }

  pub fn numerator(&self) -> u32 {
    self.num
  }

  pub fn denominator(&self) -> u32 {
    self.den
  }

  pub fn as_f64(&self) -> f64 {
    self.num as f64 / self.den as f64
  }

  /// 第 `index` 帧的时间戳（纳秒）
  pub fn frame_timestamp_ns(&self, index: u64) -> u64 {
    (index as u128 * 1_000_000_000u128 * self.den as u128 / self.num as u128) as u64
  }

  /// 单帧持续时间（纳秒）
  pub fn frame_duration_ns(&self) -> u64 {
    (1_000_000_000u128 * self.den as u128 / self.num as u128) as u64
  }
}

impl fmt::Display for FrameRate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.num, self.den)
  }
}

impl FromStr for FrameRate {
  type Err = FrameRateError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    let (num, den) = match s.split_once('/') {
      Some((num, den)) => (num.trim(), den.trim()),
      None => (s, "1"),
    };
    let num = num
      .parse::<u32>()
      .map_err(|_| FrameRateError::Malformed(s.to_string()))?;
    let den = den
      .parse::<u32>()
      .map_err(|_| FrameRateError::Malformed(s.to_string()))?;
    FrameRate::new(num, den).map_err(|_| FrameRateError::NotPositive(s.to_string()))
  }
}

/// 平面排列（CHW）的 f32 张量，批大小固定为 1
#[derive(Debug, Clone)]
pub struct NchwTensor {
  data: Box<[f32]>,
  height: usize,
  width: usize,
}

impl NchwTensor {
  /// 将 HWC 排列的 RGB 图像转换为 CHW，并逐通道减去均值
  pub fn from_rgb_image(image: &RgbImage, mean: [f32; 3]) -> Self {
    let (width, height) = image.dimensions();
    let (width, height) = (width as usize, height as usize);
    let plane = width * height;
    let mut data = vec![0f32; RGB_CHANNELS * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
      let idx = (y as usize) * width + (x as usize);
      for c in 0..RGB_CHANNELS {
        data[c * plane + idx] = pixel[c] as f32 - mean[c];
      }
    }

    Self {
      data: data.into_boxed_slice(),
      height,
      width,
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  /// `[1, C, H, W]`
  pub fn shape(&self) -> [usize; 4] {
    [1, RGB_CHANNELS, self.height, self.width]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn parses_rational_and_integer_rates() {
    assert_eq!("24/1".parse::<FrameRate>(), Ok(FrameRate::integer(24)));
    assert_eq!("25".parse::<FrameRate>(), Ok(FrameRate::integer(25)));
    let ntsc: FrameRate = "30000/1001".parse().unwrap();
    assert!((ntsc.as_f64() - 29.97).abs() < 0.01);
    assert_eq!(ntsc.to_string(), "30000/1001");
  }

  #[test]
  fn rejects_degenerate_rates() {
    assert!(matches!(
      "0/0".parse::<FrameRate>(),
      Err(FrameRateError::NotPositive(_))
    ));
    assert!(matches!(
      "abc".parse::<FrameRate>(),
      Err(FrameRateError::Malformed(_))
    ));
  }

  #[test]
  fn timestamps_follow_rate() {
    let rate = FrameRate::integer(24);
    assert_eq!(rate.frame_timestamp_ns(0), 0);
    assert_eq!(rate.frame_timestamp_ns(24), 1_000_000_000);
    assert_eq!(rate.frame_duration_ns(), 41_666_666);
  }

  #[test]
  fn nchw_is_planar_and_mean_subtracted() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([10, 20, 30]));
    image.put_pixel(1, 0, Rgb([40, 50, 60]));

    let tensor = NchwTensor::from_rgb_image(&image, [1.0, 2.0, 3.0]);
    assert_eq!(tensor.shape(), [1, 3, 1, 2]);
    assert_eq!(tensor.as_slice(), &[9.0, 39.0, 18.0, 48.0, 27.0, 57.0]);
  }

  #[test]
  fn mean_is_subtracted_from_raw_pixel_values() {
    let image = RgbImage::from_pixel(1, 1, Rgb([255, 128, 0]));
    let mean = [104.0 / 256.0, 117.0 / 256.0, 123.0 / 256.0];

    let tensor = NchwTensor::from_rgb_image(&image, mean);
    assert_eq!(
      tensor.as_slice(),
      &[255.0 - mean[0], 128.0 - mean[1], 0.0 - mean[2]]
    );
  }
}
