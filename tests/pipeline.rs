// 该文件是 Beishan （北山） 项目的一部分。
// tests/pipeline.rs - 端到端流程测试
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

use std::process::Command;

use beishan::{
  annotate::Annotator,
  frame::FrameRate,
  input::{FfmpegInput, ImageFileInput, VideoBackend, VideoSource},
  model::{DetectItem, DetectionBatch, LabelMap, Model},
  output::{FfmpegVideoOutput, SaveImageFileOutput, VideoSink},
  task::{self, VideoOptions},
};
use image::{Rgb, RgbImage};

const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);

#[derive(Debug, thiserror::Error)]
#[error("never fails")]
struct Never;

/// 固定输出：类别 2 一个 0.8 的框，类别 1 一个低于阈值的框
struct FixedModel;

impl Model for FixedModel {
  type Input = ();
  type Error = Never;

  fn input_size(&self) -> (u32, u32) {
    (300, 300)
  }

  fn preprocess(&self, _frame: &RgbImage) -> Result<(), Never> {
    Ok(())
  }

  fn infer(&self, _input: &()) -> Result<DetectionBatch, Never> {
    Ok(DetectionBatch::new(vec![
      vec![DetectItem {
        score: 0.99,
        bbox: [0.0, 0.0, 1.0, 1.0],
      }],
      vec![DetectItem {
        score: 0.3,
        bbox: [0.0, 0.0, 0.9, 0.9],
      }],
      vec![DetectItem {
        score: 0.8,
        bbox: [0.25, 0.5, 0.75, 0.75],
      }],
    ]))
  }
}

fn ffmpeg_available() -> bool {
  ["ffmpeg", "ffprobe"].iter().all(|program| {
    Command::new(program)
      .arg("-version")
      .output()
      .map(|o| o.status.success())
      .unwrap_or(false)
  })
}

#[test]
fn image_round_trip_draws_configured_labels() {
  let dir = tempfile::tempdir().unwrap();
  let input_path = dir.path().join("input.png");
  let output_path = dir.path().join("out/annotated.png");
  let labels_path = dir.path().join("labels.txt");

  RgbImage::from_pixel(40, 40, Rgb([10, 20, 30]))
    .save(&input_path)
    .unwrap();
  std::fs::write(&labels_path, "cat\n\ndog\n").unwrap();

  let annotator =
    Annotator::new(FixedModel).with_labels(LabelMap::from_file(&labels_path).unwrap());

  let image = ImageFileInput::open(&input_path).unwrap().into_image();
  let overlays = annotator.annotate(&mut image.clone()).unwrap();
  assert_eq!(overlays.len(), 1);
  assert_eq!(overlays[0].label.text, "dog: 0.80");

  let image = task::process_image(&annotator, image).unwrap();
  SaveImageFileOutput::new(&output_path).save(&image).unwrap();

  let saved = image::open(&output_path).unwrap().to_rgb8();
  assert_eq!(saved.dimensions(), (40, 40));
  // (10,20)-(30,30)
  assert_eq!(*saved.get_pixel(10, 25), YELLOW);
  assert_eq!(*saved.get_pixel(30, 30), YELLOW);
  assert_eq!(*saved.get_pixel(20, 25), Rgb([10, 20, 30]));
  assert_eq!(*saved.get_pixel(39, 39), Rgb([10, 20, 30]));
}

#[test]
fn video_keeps_frame_count_and_rate() {
  if !ffmpeg_available() {
    eprintln!("ffmpeg 不可用，跳过视频测试");
    return;
  }

  let dir = tempfile::tempdir().unwrap();
  let input_path = dir.path().join("clip.nut");
  let output_path = dir.path().join("annotated.nut");
  let rate = FrameRate::integer(24);

  let mut writer = FfmpegVideoOutput::new(&input_path, rate);
  for _ in 0..3 {
    writer
      .write_frame(&RgbImage::from_pixel(32, 32, Rgb([40, 40, 40])))
      .unwrap();
  }
  writer.finish().unwrap();

  let annotator = Annotator::new(FixedModel).with_labels(LabelMap::new(vec![
    "cat".to_string(),
    "dog".to_string(),
  ]));
  let summary = task::process_video(
    &annotator,
    &input_path,
    &output_path,
    VideoBackend::Ffmpeg,
    VideoOptions::default(),
  )
  .unwrap();
  assert_eq!(summary.frames, 3);
  assert_eq!(summary.failed_frames, 0);
  assert_eq!(summary.frame_rate, rate);

  let reader = FfmpegInput::open(&output_path).unwrap();
  assert_eq!(reader.frame_rate(), Some(rate));
  let frames = reader.collect::<Result<Vec<_>, _>>().unwrap();
  assert_eq!(frames.len(), 3);
  for (i, frame) in frames.iter().enumerate() {
    assert_eq!(frame.index, i as u64);
    assert_eq!(frame.image.dimensions(), (32, 32));
  }
}
