// 该文件是 Beishan （北山） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::path::Path;

use thiserror::Error;

use crate::frame::{Frame, FrameRate};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

mod ffmpeg_input;
pub use self::ffmpeg_input::{FfmpegInput, FfmpegInputError, VideoProbe};

#[cfg(feature = "gstreamer_video")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_video")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError};

/// 视频编解码后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum VideoBackend {
  /// 调用 ffmpeg / ffprobe 命令行工具
  #[default]
  Ffmpeg,
  /// GStreamer 管道（需要 gstreamer_video 特性）
  Gstreamer,
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("ffmpeg input error: {0}")]
  FfmpegInputError(#[from] FfmpegInputError),
  #[cfg(feature = "gstreamer_video")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("backend {0:?} is not compiled in")]
  BackendUnavailable(VideoBackend),
}

/// 按到达顺序逐帧产生图像的视频输入
pub trait VideoSource: Iterator<Item = Result<Frame, InputError>> {
  /// 输入声明的帧率，未知时为 `None`
  fn frame_rate(&self) -> Option<FrameRate>;
}

/// 打开视频输入
pub fn open_video<P: AsRef<Path>>(
  backend: VideoBackend,
  path: P,
) -> Result<Box<dyn VideoSource>, InputError> {
  let path = path.as_ref();
  match backend {
    VideoBackend::Ffmpeg => Ok(Box::new(FfmpegInput::open(path)?)),
    #[cfg(feature = "gstreamer_video")]
    VideoBackend::Gstreamer => Ok(Box::new(GStreamerInput::open(path)?)),
    #[cfg(not(feature = "gstreamer_video"))]
    VideoBackend::Gstreamer => Err(InputError::BackendUnavailable(backend)),
  }
}
