// 该文件是 Beishan （北山） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, warn};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 14.0;
const LABEL_CHAR_WIDTH: u32 = 7; // 无字体时每字符平均宽度（粗略估计）
const LABEL_TEXT_HEIGHT: u32 = 12;
const LABEL_PADDING_X: i32 = 2;
const LABEL_PADDING_Y: i32 = 8;
const LABEL_BASELINE_OFFSET: i32 = 6;
const BOX_COLOR: [u8; 3] = [255, 255, 0]; // 黄色
const TEXT_COLOR: [u8; 3] = [0, 0, 0];
// 帧外坐标的截断范围上限，保证矩形的右/下边仍在 i32 内
const MAX_COORD_SPAN: f32 = (1 << 28) as f32;

const SYSTEM_FONTS: [&str; 6] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "/Library/Fonts/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件 {path}: {source}")]
  FontIo {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("无效的字体文件: {0}")]
  InvalidFont(String),
}

/// 像素坐标下的检测框，角点均包含在框内
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
  pub x0: i32,
  pub y0: i32,
  pub x1: i32,
  pub y1: i32,
}

impl PixelBox {
  /// 归一化坐标乘以帧尺寸后向零截断
  ///
  /// 远在帧外的坐标被收拢到 `[-dim, 2 * dim]`，收拢后的边仍在帧外，
  /// 绘制结果不变。
  pub fn from_normalized(bbox: &[f32; 4], width: u32, height: u32) -> Self {
    let to_pixel = |v: f32, dim: u32| {
      let dim = (dim as f32).min(MAX_COORD_SPAN);
      (v * dim).clamp(-dim, 2.0 * dim) as i32
    };
    Self {
      x0: to_pixel(bbox[0], width),
      y0: to_pixel(bbox[1], height),
      x1: to_pixel(bbox[2], width),
      y1: to_pixel(bbox[3], height),
    }
  }

  /// 覆盖两个角点的矩形（角点顺序颠倒时同样成立）
  pub fn to_rect(&self) -> Rect {
    let left = self.x0.min(self.x1);
    let top = self.y0.min(self.y1);
    let width = self.x0.abs_diff(self.x1).saturating_add(1);
    let height = self.y0.abs_diff(self.y1).saturating_add(1);
    Rect::at(left, top).of_size(width, height)
  }
}

/// 检测框上方的标签
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTag {
  pub text: String,
  /// 底边与检测框左上角对齐的背景矩形
  pub background: Rect,
  /// 文本左上角
  pub text_x: i32,
  pub text_y: i32,
}

/// 一个待绘制的检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
  pub class_index: usize,
  pub score: f32,
  pub bbox: PixelBox,
  pub label: LabelTag,
}

pub fn label_text(class_name: &str, score: f32) -> String {
  format!("{}: {:.2}", class_name, score)
}

pub struct Draw {
  font: Option<FontArc>,
  font_scale: PxScale,
  box_color: Rgb<u8>,
  text_color: Rgb<u8>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      box_color: Rgb(BOX_COLOR),
      text_color: Rgb(TEXT_COLOR),
    }
  }
}

impl std::fmt::Debug for Draw {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Draw")
      .field("font", &self.font.is_some())
      .field("font_scale", &self.font_scale)
      .field("box_color", &self.box_color)
      .field("text_color", &self.text_color)
      .finish()
  }
}

impl Draw {
  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn load_font<P: AsRef<Path>>(path: P) -> Result<FontArc, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| DrawError::FontIo {
      path: path.display().to_string(),
      source,
    })?;
    FontArc::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.display().to_string()))
  }

  /// 依次尝试常见的系统字体
  pub fn probe_system_font() -> Option<FontArc> {
    SYSTEM_FONTS.iter().find_map(|path| {
      let font = Self::load_font(path).ok()?;
      debug!("使用系统字体: {}", path);
      Some(font)
    })
  }

  /// 文本的宽和高（像素）
  pub fn measure(&self, text: &str) -> (u32, u32) {
    match &self.font {
      Some(font) => text_size(self.font_scale, font, text),
      None => (
        text.chars().count() as u32 * LABEL_CHAR_WIDTH,
        LABEL_TEXT_HEIGHT,
      ),
    }
  }

  /// 计算检测结果在 `width`x`height` 帧上的绘制位置
  pub fn overlay(
    &self,
    class_index: usize,
    class_name: &str,
    score: f32,
    bbox: &[f32; 4],
    width: u32,
    height: u32,
  ) -> Option<Overlay> {
    if bbox.iter().any(|v| !v.is_finite()) {
      warn!("类别 {} 的检测框坐标无效: {:?}，跳过", class_index, bbox);
      return None;
    }

    let bbox = PixelBox::from_normalized(bbox, width, height);
    let text = label_text(class_name, score);
    let (text_width, text_height) = self.measure(&text);
    let text_height = text_height as i32;

    let background = Rect::at(
      bbox.x0,
      bbox
        .y0
        .saturating_sub(text_height)
        .saturating_sub(LABEL_PADDING_Y),
    )
    .of_size(
      text_width + LABEL_PADDING_X as u32 + 1,
      (text_height + LABEL_PADDING_Y) as u32 + 1,
    );

    Some(Overlay {
      class_index,
      score,
      bbox,
      label: LabelTag {
        text,
        background,
        text_x: bbox.x0.saturating_add(LABEL_PADDING_X),
        text_y: bbox
          .y0
          .saturating_sub(LABEL_BASELINE_OFFSET)
          .saturating_sub(text_height),
      },
    })
  }

  pub fn render(&self, image: &mut RgbImage, overlay: &Overlay) {
    draw_hollow_rect_mut(image, overlay.bbox.to_rect(), self.box_color);
    draw_filled_rect_mut(image, overlay.label.background, self.box_color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        self.text_color,
        overlay.label.text_x,
        overlay.label.text_y,
        self.font_scale,
        font,
        &overlay.label.text,
      );
    }
  }
}
