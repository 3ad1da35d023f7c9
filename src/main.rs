// 该文件是 Beishan （北山） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::sync::mpsc;
use std::{thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use beishan::{
  FromUrl, FromUrlWithScheme,
  annotate::Annotator,
  input::ImageFileInput,
  model::{LabelMap, Ssd, SsdBuilder},
  output::{SaveImageFileOutput, draw::Draw},
  task::{self, VideoOptions},
};

use args::{Args, MediaType};

fn load_model(weights: &str) -> Result<Ssd> {
  let builder = match Url::parse(weights) {
    Ok(url) if url.scheme() == SsdBuilder::SCHEME || url.scheme() == "file" => {
      SsdBuilder::from_url(&url)?
    }
    _ => SsdBuilder::new(weights),
  };

  info!("正在加载模型: {}", builder.weights().display());
  let now = std::time::Instant::now();
  let model = builder.build()?;
  info!("模型加载完成，耗时: {:.2?}", now.elapsed());
  Ok(model)
}

fn load_draw(args: &Args) -> Result<Draw> {
  let font = match &args.font {
    Some(path) => Some(Draw::load_font(path)?),
    None => Draw::probe_system_font(),
  };

  Ok(match font {
    Some(font) => Draw::default().with_font(font),
    None => {
      warn!("未找到可用字体，标签只绘制背景");
      Draw::default()
    }
  })
}

fn stop_channel() -> Result<mpsc::Receiver<()>> {
  let (tx, rx) = mpsc::channel();

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  Ok(rx)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let Some(media_type) = MediaType::parse(&args.media_type) else {
    println!("The input must be an image or a video!");
    println!("Aborted...");
    std::process::exit(2);
  };

  info!("输入: {} ({:?})", args.filename.display(), media_type);
  info!("输出: {}", args.output.display());

  let labels = match &args.labels {
    Some(path) => LabelMap::from_file(path)?,
    None => LabelMap::default(),
  };
  let annotator = Annotator::new(load_model(&args.weights)?)
    .with_labels(labels)
    .with_draw(load_draw(&args)?);
  info!("模型运行阶段: {:?}", annotator.model().phase());

  match media_type {
    MediaType::Image => {
      let image = ImageFileInput::open(&args.filename)?.into_image();
      let image = task::process_image(&annotator, image)?;
      SaveImageFileOutput::new(&args.output).save(&image)?;
    }
    MediaType::Video => {
      let options = VideoOptions {
        fail_fast: args.fail_fast,
        max_frames: args.max_frames,
        stop: Some(stop_channel()?),
      };
      let summary = task::process_video(
        &annotator,
        &args.filename,
        &args.output,
        args.backend,
        options,
      )?;
      info!(
        "视频处理完成: {} 帧 @ {} fps -> {}",
        summary.frames,
        summary.frame_rate,
        args.output.display()
      );
      if summary.failed_frames > 0 {
        warn!("{} 帧推理失败，已按原图写入", summary.failed_frames);
      }
    }
  }

  Ok(())
}
