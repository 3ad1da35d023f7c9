// 该文件是 Beishan （北山） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use beishan::input::VideoBackend;
use clap::Parser;

pub const DEFAULT_WEIGHTS: &str = "./weights/ssd300_mAP_77.43_v2.onnx";

/// SSD 目标检测：在图像或视频上绘制检测框与标签
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像或视频的路径
  #[arg(short = 'f', long, value_name = "FILE")]
  pub filename: PathBuf,

  /// 输入类型: image 或 video
  #[arg(short = 't', long = "type", value_name = "TYPE")]
  pub media_type: String,

  /// 输出路径
  #[arg(short = 'o', long, value_name = "OUTPUT")]
  pub output: PathBuf,

  /// 模型权重，文件路径或 ssd:///path/to/model.onnx?size=300 形式的 URL
  #[arg(short = 'w', long, default_value = DEFAULT_WEIGHTS, value_name = "WEIGHTS")]
  pub weights: String,

  /// 类别名称文件，每行一个（默认为 VOC 20 类）
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 标签文字使用的 TrueType 字体，未指定时尝试常见系统字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 视频编解码后端
  #[arg(long, value_enum, default_value_t = VideoBackend::Ffmpeg)]
  pub backend: VideoBackend,

  /// 任一视频帧推理失败时立即退出
  #[arg(long)]
  pub fail_fast: bool,

  /// 最大处理帧数（仅对视频有效）
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
  Image,
  Video,
}

impl MediaType {
  /// 只接受小写的 `image` 与 `video`
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "image" => Some(MediaType::Image),
      "video" => Some(MediaType::Video),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn media_type_is_exact() {
    assert_eq!(MediaType::parse("image"), Some(MediaType::Image));
    assert_eq!(MediaType::parse("video"), Some(MediaType::Video));
    assert_eq!(MediaType::parse("Video"), None);
    assert_eq!(MediaType::parse("audio"), None);
  }

  #[test]
  fn defaults() {
    let args = Args::try_parse_from(["ssd-detect", "-f", "in.jpg", "-t", "image", "-o", "out.jpg"])
      .unwrap();
    assert_eq!(args.weights, DEFAULT_WEIGHTS);
    assert_eq!(args.backend, VideoBackend::Ffmpeg);
    assert!(!args.fail_fast);
    assert_eq!(args.max_frames, None);
  }

  #[test]
  fn missing_required_flags_is_a_usage_error() {
    let err = Args::try_parse_from(["ssd-detect", "-t", "image"]).unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    assert_eq!(err.exit_code(), 2);
  }
}
