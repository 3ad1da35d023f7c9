// 该文件是 Beishan （北山） 项目的一部分。
// src/task.rs - 图像与视频任务
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
use std::sync::mpsc::Receiver;
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  annotate::{AnnotateError, Annotator},
  frame::FrameRate,
  input::{self, InputError, VideoBackend, VideoSource},
  model::Model,
  output::{self, OutputError, VideoSink},
};

/// 输入未声明帧率时使用的输出帧率
pub const DEFAULT_FRAME_RATE: FrameRate = FrameRate::integer(25);

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
  #[error("第 {index} 帧推理失败: {source}")]
  Inference {
    index: u64,
    #[source]
    source: AnnotateError,
  },
}

/// 单张图像任务：检测并标注，返回同一个帧缓冲
pub fn process_image<M: Model>(
  annotator: &Annotator<M>,
  image: RgbImage,
) -> Result<RgbImage, AnnotateError> {
  info!("开始任务...");
  let now = Instant::now();
  let image = annotator.annotate_owned(image)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());
  Ok(image)
}

#[derive(Debug, Default)]
pub struct VideoOptions {
  /// 任一帧推理失败即中止任务
  pub fail_fast: bool,
  /// 最大处理帧数
  pub max_frames: Option<u64>,
  /// 停止信号，在帧与帧之间检查
  pub stop: Option<Receiver<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSummary {
  /// 写入输出的帧数
  pub frames: u64,
  /// 推理失败、以原图写入的帧数
  pub failed_frames: u64,
  pub frame_rate: FrameRate,
  pub cancelled: bool,
}

/// 选择输出帧率：沿用输入帧率，未知时退回默认值
pub fn output_frame_rate(input: Option<FrameRate>) -> FrameRate {
  input.unwrap_or_else(|| {
    warn!("无法获取输入帧率，使用默认帧率 {}", DEFAULT_FRAME_RATE);
    DEFAULT_FRAME_RATE
  })
}

#[derive(Debug, Default)]
pub struct VideoTask {
  options: VideoOptions,
  frame_rate: Option<FrameRate>,
}

impl VideoTask {
  pub fn new(options: VideoOptions) -> Self {
    Self {
      options,
      frame_rate: None,
    }
  }

  /// 输出已按 `frame_rate` 打开时，由调用方给定帧率
  pub fn with_frame_rate(mut self, frame_rate: FrameRate) -> Self {
    self.frame_rate = Some(frame_rate);
    self
  }

  /// 逐帧标注并写入输出；无论成功与否都会结束输出
  pub fn run<M, S, K>(
    &self,
    annotator: &Annotator<M>,
    source: &mut S,
    sink: &mut K,
  ) -> Result<VideoSummary, TaskError>
  where
    M: Model,
    S: VideoSource + ?Sized,
    K: VideoSink + ?Sized,
  {
    info!("开始任务...");
    let mut summary = VideoSummary {
      frames: 0,
      failed_frames: 0,
      frame_rate: self
        .frame_rate
        .unwrap_or_else(|| output_frame_rate(source.frame_rate())),
      cancelled: false,
    };

    let result = self.run_frames(annotator, source, sink, &mut summary);
    let finished = sink.finish();

    match (result, finished) {
      (Err(e), finished) => {
        if let Err(fe) = finished {
          error!("结束视频输出失败: {}", fe);
        }
        Err(e)
      }
      (Ok(()), Err(e)) => Err(e.into()),
      (Ok(()), Ok(())) => {
        info!(
          "任务完成: {} 帧 (失败 {} 帧) @ {} fps",
          summary.frames, summary.failed_frames, summary.frame_rate
        );
        Ok(summary)
      }
    }
  }

  fn stop_requested(&self) -> bool {
    self
      .options
      .stop
      .as_ref()
      .map(|rx| rx.try_recv().is_ok())
      .unwrap_or(false)
  }

  fn run_frames<M, S, K>(
    &self,
    annotator: &Annotator<M>,
    source: &mut S,
    sink: &mut K,
    summary: &mut VideoSummary,
  ) -> Result<(), TaskError>
  where
    M: Model,
    S: VideoSource + ?Sized,
    K: VideoSink + ?Sized,
  {
    loop {
      if self
        .options
        .max_frames
        .map(|n| summary.frames >= n)
        .unwrap_or(false)
      {
        info!("达到指定帧数 {}, 退出任务循环", summary.frames);
        break;
      }
      if self.stop_requested() {
        warn!("中断信号接收，退出任务循环");
        summary.cancelled = true;
        break;
      }

      let Some(frame) = source.next() else {
        break;
      };
      let frame = frame?;
      let index = frame.index;
      let mut image = frame.image;

      info!("处理第 {} 帧图像", index);
      let now = Instant::now();
      match annotator.annotate(&mut image) {
        Ok(overlays) => {
          debug!(
            "第 {} 帧: {} 个检测结果，耗时: {:.2?}",
            index,
            overlays.len(),
            now.elapsed()
          );
        }
        Err(e) if self.options.fail_fast => {
          return Err(TaskError::Inference { index, source: e });
        }
        Err(e) => {
          error!("第 {} 帧推理失败，写入原图: {}", index, e);
          summary.failed_frames += 1;
        }
      }

      sink.write_frame(&image)?;
      summary.frames += 1;
    }

    Ok(())
  }
}

/// 视频任务：按输入帧率打开输出，逐帧标注
pub fn process_video<M: Model>(
  annotator: &Annotator<M>,
  input_path: &Path,
  output_path: &Path,
  backend: VideoBackend,
  options: VideoOptions,
) -> Result<VideoSummary, TaskError> {
  let mut source = input::open_video(backend, input_path)?;
  let frame_rate = output_frame_rate(source.frame_rate());
  let mut sink = output::open_video_output(backend, output_path, frame_rate)?;

  VideoTask::new(options)
    .with_frame_rate(frame_rate)
    .run(annotator, source.as_mut(), sink.as_mut())
}
