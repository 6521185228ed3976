//! 测试图案采集 - 合成的移动目标, 无需摄像头

use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use super::frame_source::Capture;
use crate::error::CaptureError;

const BACKGROUND: Rgb<u8> = Rgb([40, 44, 52]);
const TARGET: Rgb<u8> = Rgb([230, 180, 140]);

/// 合成视频源: 一个人形矩形水平往返移动, 周期性停留
pub struct TestPatternCapture {
    width: u32,
    height: u32,
    interval: Duration,
    opened: bool,
    started: Option<Instant>,
    next_due: Option<Instant>,
}

impl TestPatternCapture {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width: width.max(16),
            height: height.max(16),
            interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            opened: false,
            started: None,
            next_due: None,
        }
    }

    /// 时刻 t (秒) 的目标中心 x: 移动 4 秒, 停留 4 秒
    fn target_x(&self, t: f64) -> f32 {
        let period = 8.0;
        let phase = t % period;
        let travel = self.width as f32 * 0.6;
        let left = self.width as f32 * 0.2;
        let progress = (if phase < 4.0 { phase / 4.0 } else { 1.0 }) as f32;
        let lap = ((t / period) as u64) % 2;
        if lap == 0 {
            left + travel * progress
        } else {
            left + travel * (1.0 - progress)
        }
    }

    /// 渲染 t 秒时的画面
    pub fn render(&self, t: f64) -> RgbImage {
        let mut img = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        let tw = (self.width / 10).max(4);
        let th = (self.height / 3).max(8);
        let cx = self.target_x(t);
        let x = cx as i32 - tw as i32 / 2;
        let y = (self.height / 2) as i32 - th as i32 / 2;
        draw_filled_rect_mut(&mut img, Rect::at(x, y).of_size(tw, th), TARGET);
        img
    }
}

impl Capture for TestPatternCapture {
    fn open(&mut self) -> Result<(), CaptureError> {
        self.opened = true;
        self.started = Some(Instant::now());
        self.next_due = None;
        Ok(())
    }

    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        let Some(started) = self.started.filter(|_| self.opened) else {
            return Err(CaptureError::Read("test pattern not open".into()));
        };
        // 按帧率节拍输出
        if let Some(due) = self.next_due {
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + self.interval);
        Ok(self.render(started.elapsed().as_secs_f64()))
    }

    fn release(&mut self) {
        self.opened = false;
    }

    fn is_network(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("test pattern {}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_requires_open() {
        let mut cap = TestPatternCapture::new(64, 48, 30);
        assert!(cap.read().is_err());
        cap.open().unwrap();
        let img = cap.read().unwrap();
        assert_eq!(img.dimensions(), (64, 48));
        cap.release();
        cap.release();
        assert!(cap.read().is_err());
    }

    #[test]
    fn target_moves_then_dwells() {
        let cap = TestPatternCapture::new(200, 100, 30);
        assert!(cap.target_x(1.0) < cap.target_x(3.0));
        assert_eq!(cap.target_x(5.0), cap.target_x(7.5));
        // 第二圈反向
        assert!(cap.target_x(9.0) > cap.target_x(11.0));
    }

    #[test]
    fn rendered_target_is_visible() {
        let cap = TestPatternCapture::new(200, 100, 30);
        let img = cap.render(5.0);
        let cx = cap.target_x(5.0) as u32;
        assert_eq!(*img.get_pixel(cx, 50), TARGET);
        assert_eq!(*img.get_pixel(1, 1), BACKGROUND);
    }
}
