// 该文件是 Beishan （北山） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频文件输出模块
//!
//! 将处理后的视频帧保存为视频文件，编码管道在第一帧到达时按帧尺寸创建。
//!
//! ## 支持的格式
//!
//! - **MP4** (H.264) - 最常用的视频格式，也是未知扩展名时的默认格式
//! - **MKV** (Matroska) - 开放标准容器格式
//! - **AVI** - 传统视频格式
//! - **WebM** (VP8) - Web 友好格式

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::FrameRate,
  output::{OutputError, VideoSink},
};

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
  /// 帧尺寸与管道不一致
  #[error("Frame size mismatch: expected {expected:?}, got {actual:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  /// 输出已结束
  #[error("Video output already finished")]
  Finished,
}

/// 按扩展名选择编码与封装部分，文件输出由单独的 filesink 完成
fn encoder_description(path: &Path) -> &'static str {
  let extension = path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase());

  match extension.as_deref() {
    Some("mkv") => {
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux"
    }
    Some("avi") => "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc ! avimux",
    Some("webm") => "appsrc name=src ! videoconvert ! vp8enc ! webmmux",
    _ => {
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! mp4mux"
    }
  }
}

/// 路径作为 filesink 的属性设置，不经过管道描述解析
fn build_pipeline(path: &Path) -> Result<(gst::Pipeline, gst_app::AppSrc), GStreamerVideoOutputError> {
  let encoder_desc = encoder_description(path);
  info!(
    "Creating video output pipeline: {} ! filesink location={}",
    encoder_desc,
    path.display()
  );

  let encode = gst::parse::bin_from_description(encoder_desc, true)?;
  let filesink = gst::ElementFactory::make("filesink")
    .name("sink")
    .property("location", path.display().to_string())
    .build()?;

  let pipeline = gst::Pipeline::new();
  pipeline.add_many([encode.upcast_ref::<gst::Element>(), &filesink])?;
  encode.link(&filesink)?;

  let appsrc = pipeline
    .by_name("src")
    .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
    .downcast::<gst_app::AppSrc>()
    .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

  Ok((pipeline, appsrc))
}

struct Encoder {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  width: u32,
  height: u32,
}

/// GStreamer 视频文件输出
pub struct GStreamerVideoOutput {
  path: PathBuf,
  frame_rate: FrameRate,
  encoder: Option<Encoder>,
  frame_count: u64,
  finished: bool,
}

impl GStreamerVideoOutput {
  pub fn new<P: Into<PathBuf>>(
    path: P,
    frame_rate: FrameRate,
  ) -> Result<Self, GStreamerVideoOutputError> {
    gst::init()?;
    Ok(Self {
      path: path.into(),
      frame_rate,
      encoder: None,
      frame_count: 0,
      finished: false,
    })
  }

  fn build_encoder(&self, width: u32, height: u32) -> Result<Encoder, GStreamerVideoOutputError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)
        .map_err(|e| GStreamerVideoOutputError::PipelineError(e.to_string()))?;
    }

    let (pipeline, appsrc) = build_pipeline(&self.path)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field(
        "framerate",
        gst::Fraction::new(
          self.frame_rate.numerator() as i32,
          self.frame_rate.denominator() as i32,
        ),
      )
      .build();

    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "Video output initialized: {}x{} @ {} fps -> {}",
      width,
      height,
      self.frame_rate,
      self.path.display()
    );

    Ok(Encoder {
      pipeline,
      appsrc,
      width,
      height,
    })
  }

  fn push_frame(&mut self, image: &RgbImage) -> Result<(), GStreamerVideoOutputError> {
    if self.finished {
      return Err(GStreamerVideoOutputError::Finished);
    }
    if self.encoder.is_none() {
      self.encoder = Some(self.build_encoder(image.width(), image.height())?);
    }
    let Some(encoder) = self.encoder.as_ref() else {
      return Err(GStreamerVideoOutputError::Finished);
    };

    if (encoder.width, encoder.height) != image.dimensions() {
      return Err(GStreamerVideoOutputError::FrameSizeMismatch {
        expected: (encoder.width, encoder.height),
        actual: image.dimensions(),
      });
    }

    let data = image.as_raw();
    let mut buffer = gst::Buffer::with_size(data.len())
      .map_err(|_| GStreamerVideoOutputError::BufferCreationError)?;

    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(
        self.frame_rate.frame_timestamp_ns(self.frame_count),
      ));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(
        self.frame_rate.frame_duration_ns(),
      ));
      let mut buffer_map = buffer_ref.map_writable().map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to map buffer".to_string())
      })?;
      buffer_map.copy_from_slice(data);
    }

    encoder.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    self.frame_count += 1;

    Ok(())
  }

  /// 发送 EOS 并等待管道写完文件
  fn close(&mut self) -> Result<(), GStreamerVideoOutputError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    let Some(encoder) = self.encoder.take() else {
      warn!("没有帧可以编码为视频: {}", self.path.display());
      return Ok(());
    };

    encoder.appsrc.end_of_stream().map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to send EOS: {:?}", e))
    })?;

    let mut result = Ok(());
    if let Some(bus) = encoder.pipeline.bus() {
      for msg in bus.iter_timed(gst::ClockTime::NONE) {
        match msg.view() {
          gst::MessageView::Eos(..) => {
            debug!("GStreamer 视频输出收到 EOS");
            break;
          }
          gst::MessageView::Error(err) => {
            result = Err(GStreamerVideoOutputError::PipelineError(format!(
              "{} ({:?})",
              err.error(),
              err.debug()
            )));
            break;
          }
          _ => {}
        }
      }
    }

    encoder.pipeline.set_state(gst::State::Null)?;

    info!(
      "Video output closed. Total frames written: {}",
      self.frame_count
    );
    result
  }
}

impl VideoSink for GStreamerVideoOutput {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    Ok(self.push_frame(image)?)
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    Ok(self.close()?)
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if !self.finished
      && let Err(e) = self.close()
    {
      error!("Failed to finalize GStreamer video output: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn container_follows_extension() {
    assert!(encoder_description(Path::new("a.MKV")).ends_with("matroskamux"));
    assert!(encoder_description(Path::new("a.avi")).ends_with("avimux"));
    assert!(encoder_description(Path::new("a.webm")).ends_with("webmmux"));
    assert!(encoder_description(Path::new("a.mov")).ends_with("mp4mux"));
    assert!(!encoder_description(Path::new("a.mp4")).contains("location"));
  }

  #[test]
  fn path_is_passed_verbatim_to_filesink() {
    gst::init().unwrap();
    let path = Path::new("/tmp/out \"v2\" ! final.webm");

    let (pipeline, _appsrc) = build_pipeline(path).unwrap();

    let filesink = pipeline.by_name("sink").unwrap();
    assert_eq!(
      filesink.property::<String>("location"),
      "/tmp/out \"v2\" ! final.webm"
    );
  }
}
