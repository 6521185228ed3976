/// 检测系统数据结构定义
/// Data structures shared by the capture, detection and control stages
use std::time::Instant;

use image::RgbImage;
use serde::Serialize;

// ========== 帧 ==========

/// 视频帧 (采集线程 → 检测线程 → 输出线程)
///
/// 跨线程交接时整体复制, 不共享像素缓冲区.
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbImage,
    pub frame_id: u64, // 帧序号
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, frame_id: u64) -> Self {
        Self {
            image,
            frame_id,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// 画面中心
    pub fn center(&self) -> (f32, f32) {
        (self.width() as f32 / 2.0, self.height() as f32 / 2.0)
    }
}

// ========== 检测框 ==========

/// 检测框 (Detection bounding box), 两个角点 + 置信度
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
            confidence,
        }
    }

    /// 获取中心点
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// 归一化到画面尺寸 [x1/w, y1/h, x2/w, y2/h], 结果限制在 [0,1]
    pub fn normalized(&self, width: u32, height: u32) -> [f32; 4] {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        [
            (self.x1 / w).clamp(0.0, 1.0),
            (self.y1 / h).clamp(0.0, 1.0),
            (self.x2 / w).clamp(0.0, 1.0),
            (self.y2 / h).clamp(0.0, 1.0),
        ]
    }
}

/// 取置信度最高的检测框
pub fn best_detection(boxes: &[BBox]) -> Option<BBox> {
    boxes
        .iter()
        .copied()
        .filter(|b| b.confidence.is_finite())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

// ========== 分割掩码 ==========

/// 跟踪器输出的概率掩码 (分辨率可能低于原始帧)
#[derive(Clone, Debug)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>, // 行优先, len = width * height
}

impl Mask {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// 阈值以上像素的外接框, 缩放到画面尺寸; 掩码为空时返回 None
    pub fn bbox(&self, threshold: f32, frame_w: u32, frame_h: u32) -> Option<BBox> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let w = self.width as usize;
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        let mut any = false;

        for (i, &v) in self.data.iter().enumerate().take(w * self.height as usize) {
            if v > threshold {
                let (x, y) = (i % w, i / w);
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                any = true;
            }
        }
        if !any {
            return None;
        }

        let sx = frame_w as f32 / self.width as f32;
        let sy = frame_h as f32 / self.height as f32;
        Some(BBox::new(
            min_x as f32 * sx,
            min_y as f32 * sy,
            (max_x + 1) as f32 * sx,
            (max_y + 1) as f32 * sy,
            1.0,
        ))
    }

    /// 掩码在 (x, y) 画面坐标处是否为前景
    pub fn covers(&self, threshold: f32, x: u32, y: u32, frame_w: u32, frame_h: u32) -> bool {
        if frame_w == 0 || frame_h == 0 {
            return false;
        }
        let mx = (x as u64 * self.width as u64 / frame_w as u64) as usize;
        let my = (y as u64 * self.height as u64 / frame_h as u64) as usize;
        self.data
            .get(my * self.width as usize + mx)
            .is_some_and(|&v| v > threshold)
    }
}
