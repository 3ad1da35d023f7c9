// 该文件是 Beishan （北山） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频文件输入
//!
//! 管道结构：
//!
//! ```text
//! filesrc location=... ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink
//! ```
//!
//! appsink 不丢帧，输出帧与输入帧一一对应。帧率取自协商后的 caps。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::{Frame, FrameRate},
  input::{InputError, VideoSource},
};

const DECODE_DESCRIPTION: &str =
  "decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink sync=false";

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// GStreamer 视频文件输入
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  /// 构造时为读取帧率而提前取出的第一个样本
  pending: Option<gst::Sample>,
  frame_rate: Option<FrameRate>,
  frame_index: u64,
  finished: bool,
}

const PULL_TIMEOUT: gst::ClockTime = gst::ClockTime::from_mseconds(100);

/// 路径作为 filesrc 的属性设置，不经过管道描述解析
fn build_pipeline(path: &Path) -> Result<(gst::Pipeline, gst_app::AppSink), GStreamerInputError> {
  let filesrc = gst::ElementFactory::make("filesrc")
    .name("source")
    .property("location", path.display().to_string())
    .build()?;
  let decode = gst::parse::bin_from_description(DECODE_DESCRIPTION, true)?;
  info!(
    "GStreamer pipeline: filesrc location={} ! {}",
    path.display(),
    DECODE_DESCRIPTION
  );

  let pipeline = gst::Pipeline::new();
  pipeline.add_many([&filesrc, decode.upcast_ref::<gst::Element>()])?;
  filesrc.link(&decode)?;

  let appsink = pipeline
    .by_name("sink")
    .ok_or(GStreamerInputError::AppSinkNotFound)?
    .downcast::<gst_app::AppSink>()
    .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

  Ok((pipeline, appsink))
}

impl GStreamerInput {
  pub fn open(path: &Path) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    let (pipeline, appsink) = build_pipeline(path)?;
    pipeline.set_state(gst::State::Playing)?;

    let mut input = GStreamerInput {
      pipeline,
      appsink,
      pending: None,
      frame_rate: None,
      frame_index: 0,
      finished: false,
    };

    match input.pull()? {
      Some(sample) => {
        input.frame_rate = sample_frame_rate(&sample);
        input.pending = Some(sample);
      }
      None => {
        warn!("视频没有任何帧: {}", path.display());
        input.finished = true;
      }
    }

    Ok(input)
  }

  /// 取下一个样本；管道出错时返回错误而不是一直阻塞
  fn pull(&self) -> Result<Option<gst::Sample>, GStreamerInputError> {
    loop {
      if let Some(sample) = self.appsink.try_pull_sample(PULL_TIMEOUT) {
        return Ok(Some(sample));
      }
      self.check_bus_error()?;
      if self.appsink.is_eos() {
        return Ok(None);
      }
    }
  }

  fn check_bus_error(&self) -> Result<(), GStreamerInputError> {
    let Some(bus) = self.pipeline.bus() else {
      return Ok(());
    };
    while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
      if let gst::MessageView::Error(err) = msg.view() {
        return Err(GStreamerInputError::PipelineError(format!(
          "{} ({:?})",
          err.error(),
          err.debug()
        )));
      }
    }
    Ok(())
  }

  fn next_sample(&mut self) -> Result<Option<gst::Sample>, GStreamerInputError> {
    match self.pending.take() {
      Some(sample) => Ok(Some(sample)),
      None => self.pull(),
    }
  }
}

fn sample_frame_rate(sample: &gst::Sample) -> Option<FrameRate> {
  let caps = sample.caps()?;
  let info = gst_video::VideoInfo::from_caps(caps).ok()?;
  let fps = info.fps();
  let rate = FrameRate::new(
    u32::try_from(fps.numer()).ok()?,
    u32::try_from(fps.denom()).ok()?,
  )
  .ok();
  debug!("输入帧率: {:?}", rate);
  rate
}

fn convert_sample(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let row_len = width * 3;
  let expected_size = stride * height.saturating_sub(1) + row_len;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  // 行可能按 4 字节对齐，需要逐行拷贝
  let mut pixels = Vec::with_capacity(row_len * height);
  for row in 0..height {
    let start = row * stride;
    pixels.extend_from_slice(&data[start..start + row_len]);
  }

  RgbImage::from_raw(width as u32, height as u32, pixels)
    .ok_or_else(|| GStreamerInputError::PipelineError("无法创建 RGB 图像".to_string()))
}

impl Iterator for GStreamerInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let sample = match self.next_sample() {
      Ok(Some(sample)) => sample,
      Ok(None) => {
        self.finished = true;
        return None;
      }
      Err(e) => {
        self.finished = true;
        return Some(Err(e.into()));
      }
    };

    match convert_sample(&sample) {
      Ok(image) => {
        let frame = Frame {
          index: self.frame_index,
          image,
        };
        self.frame_index += 1;
        Some(Ok(frame))
      }
      Err(e) => {
        self.finished = true;
        Some(Err(e.into()))
      }
    }
  }
}

impl VideoSource for GStreamerInput {
  fn frame_rate(&self) -> Option<FrameRate> {
    self.frame_rate
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn path_is_passed_verbatim_to_filesrc() {
    gst::init().unwrap();
    let path = Path::new("/tmp/clip \"final\" ! take 2.mp4");

    let (pipeline, _appsink) = build_pipeline(path).unwrap();

    let filesrc = pipeline.by_name("source").unwrap();
    assert_eq!(
      filesrc.property::<String>("location"),
      "/tmp/clip \"final\" ! take 2.mp4"
    );
  }

  #[test]
  fn unreadable_stream_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty \"clip\"!.mp4");
    std::fs::write(&path, b"").unwrap();

    assert!(matches!(
      GStreamerInput::open(&path),
      Err(GStreamerInputError::PipelineError(_) | GStreamerInputError::StateChangeError(_))
    ));
  }
}
