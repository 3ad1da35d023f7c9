// 该文件是 Beishan （北山） 项目的一部分。
// src/input/ffmpeg_input.rs - ffmpeg 视频输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 基于 ffmpeg 命令行工具的视频输入
//!
//! 先用 `ffprobe` 读取第一条视频流的尺寸与帧率，再启动 `ffmpeg`
//! 把视频解码为 RGB24 原始数据，从管道中逐帧读取。
//!
//! 此模块需要系统安装 ffmpeg 命令行工具。

use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use image::RgbImage;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{Frame, FrameRate},
  input::{InputError, VideoSource},
};

const FFMPEG: &str = "ffmpeg";
const FFPROBE: &str = "ffprobe";

#[derive(Error, Debug)]
pub enum FfmpegInputError {
  #[error("无法执行 {program} (请确保已安装): {source}")]
  Spawn {
    program: &'static str,
    #[source]
    source: std::io::Error,
  },
  #[error("ffprobe 失败: {path}: {message}")]
  Probe { path: String, message: String },
  #[error("找不到视频流: {0}")]
  NoVideoStream(String),
  #[error("读取解码数据失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("视频数据被截断: 第 {index} 帧只有 {actual}/{expected} 字节")]
  Truncated {
    index: u64,
    expected: usize,
    actual: usize,
  },
  #[error("ffmpeg 解码失败: {0}")]
  Decode(String),
}

/// ffprobe 读出的视频流信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoProbe {
  pub width: u32,
  pub height: u32,
  pub frame_rate: Option<FrameRate>,
}

impl VideoProbe {
  /// 解析 `ffprobe -of json` 的输出
  pub fn from_json(path: &str, json: &str) -> Result<Self, FfmpegInputError> {
    let value: Value = serde_json::from_str(json).map_err(|e| FfmpegInputError::Probe {
      path: path.to_string(),
      message: e.to_string(),
    })?;

    let stream = value
      .get("streams")
      .and_then(Value::as_array)
      .and_then(|streams| streams.first())
      .ok_or_else(|| FfmpegInputError::NoVideoStream(path.to_string()))?;

    let dimension = |key: &str| {
      stream
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .ok_or_else(|| FfmpegInputError::Probe {
          path: path.to_string(),
          message: format!("缺少有效的 {}", key),
        })
    };

    // avg_frame_rate 在部分容器中为 "0/0"，此时退回 r_frame_rate
    let frame_rate = ["avg_frame_rate", "r_frame_rate"]
      .iter()
      .filter_map(|key| stream.get(*key).and_then(Value::as_str))
      .find_map(|rate| rate.parse::<FrameRate>().ok());

    Ok(VideoProbe {
      width: dimension("width")?,
      height: dimension("height")?,
      frame_rate,
    })
  }

  pub fn probe(path: &Path) -> Result<Self, FfmpegInputError> {
    let output = Command::new(FFPROBE)
      .args(["-v", "error", "-select_streams", "v:0", "-show_entries"])
      .arg("stream=width,height,avg_frame_rate,r_frame_rate")
      .args(["-of", "json"])
      .arg(path)
      .output()
      .map_err(|source| FfmpegInputError::Spawn {
        program: FFPROBE,
        source,
      })?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      error!("ffprobe 错误: {}", stderr);
      return Err(FfmpegInputError::Probe {
        path: path.display().to_string(),
        message: stderr.trim().to_string(),
      });
    }

    Self::from_json(
      &path.display().to_string(),
      &String::from_utf8_lossy(&output.stdout),
    )
  }
}

/// ffmpeg 视频输入
pub struct FfmpegInput {
  child: Child,
  stdout: BufReader<ChildStdout>,
  probe: VideoProbe,
  frame_index: u64,
  finished: bool,
}

impl FfmpegInput {
  pub fn open(path: &Path) -> Result<Self, FfmpegInputError> {
    let probe = VideoProbe::probe(path)?;
    info!(
      "打开视频 {}: {}x{} @ {}",
      path.display(),
      probe.width,
      probe.height,
      probe
        .frame_rate
        .map(|r| r.to_string())
        .unwrap_or_else(|| "未知帧率".to_string())
    );

    let mut child = Command::new(FFMPEG)
      .args(["-v", "error", "-nostdin", "-i"])
      .arg(path)
      .args(["-map", "0:v:0", "-vsync", "0"])
      .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .spawn()
      .map_err(|source| FfmpegInputError::Spawn {
        program: FFMPEG,
        source,
      })?;

    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| FfmpegInputError::Decode("无法获取 ffmpeg 标准输出".to_string()))?;

    Ok(Self {
      child,
      stdout: BufReader::new(stdout),
      probe,
      frame_index: 0,
      finished: false,
    })
  }

  fn frame_len(&self) -> usize {
    self.probe.width as usize * self.probe.height as usize * 3
  }

  /// 读取一整帧；在帧边界处遇到 EOF 时返回 `None`
  fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FfmpegInputError> {
    let expected = self.frame_len();
    let mut buf = vec![0u8; expected];
    let mut filled = 0;

    while filled < expected {
      match self.stdout.read(&mut buf[filled..]) {
        Ok(0) => break,
        Ok(n) => filled += n,
        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
        Err(e) => return Err(e.into()),
      }
    }

    match filled {
      0 => Ok(None),
      n if n == expected => Ok(Some(buf)),
      actual => Err(FfmpegInputError::Truncated {
        index: self.frame_index,
        expected,
        actual,
      }),
    }
  }

  fn wait_decoder(&mut self) -> Result<(), FfmpegInputError> {
    let status = self.child.wait()?;
    if status.success() {
      debug!("ffmpeg 解码进程已退出");
      Ok(())
    } else {
      Err(FfmpegInputError::Decode(format!("ffmpeg 退出状态 {}", status)))
    }
  }
}

impl Iterator for FfmpegInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let result = match self.read_frame() {
      Ok(Some(data)) => {
        match RgbImage::from_raw(self.probe.width, self.probe.height, data) {
          Some(image) => {
            let frame = Frame {
              index: self.frame_index,
              image,
            };
            self.frame_index += 1;
            return Some(Ok(frame));
          }
          None => Err(FfmpegInputError::Decode("无法创建 RGB 图像".to_string())),
        }
      }
      Ok(None) => {
        self.finished = true;
        return self.wait_decoder().err().map(|e| Err(e.into()));
      }
      Err(e) => Err(e),
    };

    self.finished = true;
    Some(result.map_err(InputError::from))
  }
}

impl VideoSource for FfmpegInput {
  fn frame_rate(&self) -> Option<FrameRate> {
    self.probe.frame_rate
  }
}

impl Drop for FfmpegInput {
  fn drop(&mut self) {
    if let Ok(None) = self.child.try_wait() {
      if let Err(e) = self.child.kill() {
        warn!("无法结束 ffmpeg 解码进程: {}", e);
      }
      let _ = self.child.wait();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stream_info_reads_dimensions_and_rate() {
    let json = r#"{"programs":[],"streams":[{"width":640,"height":360,
      "r_frame_rate":"24/1","avg_frame_rate":"24/1"}]}"#;
    let probe = VideoProbe::from_json("in.mp4", json).unwrap();
    assert_eq!(
      probe,
      VideoProbe {
        width: 640,
        height: 360,
        frame_rate: Some(FrameRate::integer(24)),
      }
    );
  }

  #[test]
  fn stream_info_falls_back_to_real_frame_rate() {
    let json = r#"{"streams":[{"width":2,"height":2,
      "r_frame_rate":"30000/1001","avg_frame_rate":"0/0"}]}"#;
    let probe = VideoProbe::from_json("in.mkv", json).unwrap();
    assert_eq!(probe.frame_rate, Some(FrameRate::new(30000, 1001).unwrap()));
  }

  #[test]
  fn stream_info_without_rate_is_unknown() {
    let json = r#"{"streams":[{"width":2,"height":2,"avg_frame_rate":"0/0"}]}"#;
    let probe = VideoProbe::from_json("in.avi", json).unwrap();
    assert_eq!(probe.frame_rate, None);
  }

  #[test]
  fn stream_info_without_streams_fails() {
    assert!(matches!(
      VideoProbe::from_json("in.mp3", r#"{"streams":[]}"#),
      Err(FfmpegInputError::NoVideoStream(_))
    ));
    assert!(matches!(
      VideoProbe::from_json("in.mp4", r#"{"streams":[{"height":2}]}"#),
      Err(FfmpegInputError::Probe { .. })
    ));
    assert!(matches!(
      VideoProbe::from_json("in.mp4", "not json"),
      Err(FfmpegInputError::Probe { .. })
    ));
  }
}
