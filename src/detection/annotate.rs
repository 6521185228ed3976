//! 画面叠加: 准星, 检测框, 掩码, 时间戳, 占位帧
//! Overlay drawing for output frames (imageproc + ab_glyph)

use std::fs;
use std::path::Path;
use std::sync::Arc;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::rect::Rect;

use super::types::{BBox, Mask};
use crate::error::{SentinelError, SentinelResult};

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const PLACEHOLDER_BG: Rgb<u8> = Rgb([24, 24, 24]);

const CROSSHAIR_HALF: f32 = 20.0;
const MASK_ALPHA: f32 = 0.4;

/// 叠加文字用的字体, 线程间共享
#[derive(Clone)]
pub struct OverlayFont {
    font: Arc<FontVec>,
    scale: PxScale,
}

impl OverlayFont {
    pub fn load(path: impl AsRef<Path>) -> SentinelResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| SentinelError::Font(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            font: Arc::new(font),
            scale: PxScale::from(22.0),
        })
    }

    fn draw(&self, img: &mut RgbImage, x: i32, y: i32, text: &str) {
        draw_text_mut(img, WHITE, x, y, self.scale, self.font.as_ref(), text);
    }
}

impl std::fmt::Debug for OverlayFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayFont").field("scale", &self.scale.y).finish()
    }
}

/// 画面中心准星 (绿) + 中心点 (红)
pub fn draw_crosshair(img: &mut RgbImage) {
    let (cx, cy) = (img.width() as f32 / 2.0, img.height() as f32 / 2.0);
    draw_line_segment_mut(img, (cx - CROSSHAIR_HALF, cy), (cx + CROSSHAIR_HALF, cy), GREEN);
    draw_line_segment_mut(img, (cx, cy - CROSSHAIR_HALF), (cx, cy + CROSSHAIR_HALF), GREEN);
    draw_filled_circle_mut(img, (cx as i32, cy as i32), 3, RED);
}

/// 检测/跟踪框 (红) + 框中心点
pub fn draw_bbox(img: &mut RgbImage, bbox: &BBox) {
    let w = bbox.width().round() as u32;
    let h = bbox.height().round() as u32;
    if w > 0 && h > 0 {
        let rect = Rect::at(bbox.x1.round() as i32, bbox.y1.round() as i32).of_size(w, h);
        draw_hollow_rect_mut(img, rect, RED);
    }
    let (cx, cy) = bbox.center();
    draw_filled_circle_mut(img, (cx as i32, cy as i32), 4, RED);
}

/// 半透明绿色掩码
pub fn draw_mask(img: &mut RgbImage, mask: &Mask, threshold: f32) {
    let (fw, fh) = img.dimensions();
    for (x, y, px) in img.enumerate_pixels_mut() {
        if mask.covers(threshold, x, y, fw, fh) {
            for (c, g) in px.0.iter_mut().zip(GREEN.0) {
                *c = (*c as f32 * (1.0 - MASK_ALPHA) + g as f32 * MASK_ALPHA) as u8;
            }
        }
    }
}

/// 左上角 HH:MM:SS
pub fn draw_timestamp(img: &mut RgbImage, font: &OverlayFont) {
    let now = chrono::Local::now().format("%H:%M:%S").to_string();
    font.draw(img, 10, 10, &now);
}

/// 非活动时的占位帧
pub fn placeholder_frame(width: u32, height: u32, font: Option<&OverlayFont>) -> RgbImage {
    let mut img = RgbImage::from_pixel(width.max(1), height.max(1), PLACEHOLDER_BG);
    if let Some(font) = font {
        font.draw(&mut img, 20, (height / 2) as i32 - 11, "Waiting for trigger...");
    }
    img
}
