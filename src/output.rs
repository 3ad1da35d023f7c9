// 该文件是 Beishan （北山） 项目的一部分。
// src/output.rs - 输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use image::RgbImage;
use thiserror::Error;

use crate::{frame::FrameRate, input::VideoBackend};

pub mod draw;

mod save_image_file;
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

mod ffmpeg_video_output;
pub use self::ffmpeg_video_output::{FfmpegVideoOutput, FfmpegVideoOutputError};

#[cfg(feature = "gstreamer_video")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_video")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("ffmpeg 视频输出错误: {0}")]
  FfmpegVideoOutputError(#[from] FfmpegVideoOutputError),
  #[cfg(feature = "gstreamer_video")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
  #[error("未编译 {0:?} 后端")]
  BackendUnavailable(VideoBackend),
}

/// 按固定帧率顺序追加帧的视频输出
///
/// `finish` 之后不再接受帧；实现者在 `Drop` 中也会补做 `finish`，
/// 保证任何退出路径下输出文件都被正确封装。
pub trait VideoSink {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError>;
  fn finish(&mut self) -> Result<(), OutputError>;
}

impl<S: VideoSink + ?Sized> VideoSink for Box<S> {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    (**self).write_frame(image)
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    (**self).finish()
  }
}

/// 创建视频输出
pub fn open_video_output<P: AsRef<Path>>(
  backend: VideoBackend,
  path: P,
  frame_rate: FrameRate,
) -> Result<Box<dyn VideoSink>, OutputError> {
  let path = path.as_ref();
  match backend {
    VideoBackend::Ffmpeg => Ok(Box::new(FfmpegVideoOutput::new(path, frame_rate))),
    #[cfg(feature = "gstreamer_video")]
    VideoBackend::Gstreamer => Ok(Box::new(GStreamerVideoOutput::new(path, frame_rate)?)),
    #[cfg(not(feature = "gstreamer_video"))]
    VideoBackend::Gstreamer => Err(OutputError::BackendUnavailable(backend)),
  }
}
