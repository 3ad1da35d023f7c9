// 该文件是 Beishan （北山） 项目的一部分。
// src/output/ffmpeg_video_output.rs - ffmpeg 视频文件输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 视频文件输出模块
//!
//! 第一帧到达时才启动 `ffmpeg`，帧尺寸取自第一帧，之后的 RGB24
//! 原始数据经标准输入写入编码进程。编码参数由输出文件扩展名决定。
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 命令行工具来编码视频。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::FrameRate,
  output::{OutputError, VideoSink},
};

const FFMPEG: &str = "ffmpeg";

#[derive(Error, Debug)]
pub enum FfmpegVideoOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法执行 ffmpeg (请确保已安装): {0}")]
  Spawn(#[source] std::io::Error),
  #[error("视频编码错误: {0}")]
  EncodingError(String),
  #[error("帧尺寸不一致: 期望 {expected:?}, 实际 {actual:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("视频输出已结束")]
  Finished,
}

/// 根据扩展名选择编码参数
pub fn encoder_args(path: &Path) -> Vec<&'static str> {
  let extension = path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase());

  match extension.as_deref() {
    // yuv420p 要求宽高为偶数
    Some("mp4" | "mkv" | "mov" | "avi") => vec![
      "-c:v",
      "libx264",
      "-preset",
      "fast",
      "-crf",
      "23",
      "-pix_fmt",
      "yuv420p",
      "-vf",
      "pad=ceil(iw/2)*2:ceil(ih/2)*2",
    ],
    Some("webm") => vec!["-c:v", "libvpx-vp9", "-pix_fmt", "yuv420p"],
    _ => Vec::new(),
  }
}

struct Encoder {
  child: Child,
  stdin: Option<ChildStdin>,
  width: u32,
  height: u32,
}

pub struct FfmpegVideoOutput {
  path: PathBuf,
  frame_rate: FrameRate,
  encoder: Option<Encoder>,
  frame_count: u64,
  finished: bool,
}

impl FfmpegVideoOutput {
  pub fn new<P: Into<PathBuf>>(path: P, frame_rate: FrameRate) -> Self {
    Self {
      path: path.into(),
      frame_rate,
      encoder: None,
      frame_count: 0,
      finished: false,
    }
  }

  pub fn frame_count(&self) -> u64 {
    self.frame_count
  }

  fn spawn_encoder(&self, width: u32, height: u32) -> Result<Encoder, FfmpegVideoOutputError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    info!(
      "开始编码视频: {}x{} @ {} fps -> {}",
      width,
      height,
      self.frame_rate,
      self.path.display()
    );

    let mut child = Command::new(FFMPEG)
      .args(["-y", "-v", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"])
      .arg("-s")
      .arg(format!("{}x{}", width, height))
      .arg("-framerate")
      .arg(self.frame_rate.to_string())
      .args(["-i", "-"])
      .args(encoder_args(&self.path))
      .arg(&self.path)
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::inherit())
      .spawn()
      .map_err(FfmpegVideoOutputError::Spawn)?;

    let stdin = child.stdin.take();
    Ok(Encoder {
      child,
      stdin,
      width,
      height,
    })
  }

  fn push_frame(&mut self, image: &RgbImage) -> Result<(), FfmpegVideoOutputError> {
    if self.finished {
      return Err(FfmpegVideoOutputError::Finished);
    }

    if self.encoder.is_none() {
      self.encoder = Some(self.spawn_encoder(image.width(), image.height())?);
    }
    let Some(encoder) = self.encoder.as_mut() else {
      return Err(FfmpegVideoOutputError::Finished);
    };

    if (encoder.width, encoder.height) != image.dimensions() {
      return Err(FfmpegVideoOutputError::FrameSizeMismatch {
        expected: (encoder.width, encoder.height),
        actual: image.dimensions(),
      });
    }

    let stdin = encoder
      .stdin
      .as_mut()
      .ok_or_else(|| FfmpegVideoOutputError::EncodingError("编码进程标准输入已关闭".to_string()))?;
    stdin.write_all(image.as_raw())?;
    self.frame_count += 1;

    Ok(())
  }

  fn close(&mut self) -> Result<(), FfmpegVideoOutputError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    let Some(mut encoder) = self.encoder.take() else {
      warn!("没有帧可以编码为视频，跳过编码过程: {}", self.path.display());
      return Ok(());
    };

    // 关闭标准输入，ffmpeg 读到 EOF 后封装文件
    drop(encoder.stdin.take());
    let status = encoder.child.wait()?;
    if !status.success() {
      error!("ffmpeg 错误: 退出状态 {}", status);
      return Err(FfmpegVideoOutputError::EncodingError(format!(
        "ffmpeg 失败: {}",
        status
      )));
    }

    info!(
      "视频编码成功: {} 帧 -> {}",
      self.frame_count,
      self.path.display()
    );
    Ok(())
  }
}

impl VideoSink for FfmpegVideoOutput {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    Ok(self.push_frame(image)?)
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    Ok(self.close()?)
  }
}

impl Drop for FfmpegVideoOutput {
  fn drop(&mut self) {
    if !self.finished {
      debug!("视频输出未显式结束，在析构时完成编码");
      if let Err(e) = self.close() {
        error!("完成视频编码失败: {}", e);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn container_extensions_select_h264() {
    let args = encoder_args(Path::new("out/result.MP4"));
    assert!(args.contains(&"libx264"));
    assert!(args.contains(&"yuv420p"));
    assert!(encoder_args(Path::new("a.avi")).contains(&"libx264"));
  }

  #[test]
  fn webm_selects_vp9() {
    assert!(encoder_args(Path::new("a.webm")).contains(&"libvpx-vp9"));
  }

  #[test]
  fn unknown_extension_leaves_encoder_to_ffmpeg() {
    assert!(encoder_args(Path::new("a.gif")).is_empty());
    assert!(encoder_args(Path::new("noext")).is_empty());
  }

  #[test]
  fn finishing_without_frames_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.mp4");
    let mut output = FfmpegVideoOutput::new(&path, FrameRate::integer(25));
    output.finish().unwrap();
    output.finish().unwrap();
    assert!(!path.exists());
    assert!(matches!(
      output.push_frame(&RgbImage::new(2, 2)),
      Err(FfmpegVideoOutputError::Finished)
    ));
  }
}
