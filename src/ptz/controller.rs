//! 云台闭环控制器
//!
//! 比例增益 + 死区 + 指数平滑 + 单步限幅 + 发送限频. 角度为整数, 范围 [0,180].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use super::publisher::{ActuatorPublisher, Axis};
use crate::config::PtzConfig;
use crate::detection::types::BBox;

const ANGLE_MIN: i32 = 0;
const ANGLE_MAX: i32 = 180;

fn clamp_angle(v: f32) -> i32 {
    (v.round() as i32).clamp(ANGLE_MIN, ANGLE_MAX)
}

/// 云台控制器, 绑定一个固定的画面尺寸
pub struct PtzController {
    publisher: Arc<ActuatorPublisher>,
    frame_w: u32,
    frame_h: u32,
    kx: f32, // 度/像素
    ky: f32,
    deadzone: f32,
    max_step: f32,
    max_move: i32, // 取整后的单步上限
    min_step: f32,
    alpha: f32,
    min_interval: Duration,
    pan: i32,
    tilt: i32,
    last_send: Option<Instant>,
}

impl PtzController {
    pub fn new(config: &PtzConfig, frame_w: u32, frame_h: u32, publisher: Arc<ActuatorPublisher>) -> Self {
        let w = frame_w.max(1) as f32;
        let h = frame_h.max(1) as f32;
        debug!("🎮 云台控制器初始化: 画面 {}x{}", frame_w, frame_h);
        Self {
            publisher,
            frame_w,
            frame_h,
            kx: config.hfov_deg / w * config.pan_dir as f32 * config.gain_scale,
            ky: config.vfov_deg / h * config.tilt_dir as f32 * config.gain_scale,
            deadzone: config.deadzone_px,
            max_step: config.max_step_deg,
            max_move: config.max_step_deg.floor() as i32,
            min_step: config.min_step_deg,
            alpha: config.smooth_alpha,
            min_interval: Duration::from_secs_f64(config.min_send_interval_s.max(0.0)),
            pan: config.init_pan.clamp(ANGLE_MIN, ANGLE_MAX),
            tilt: config.init_tilt.clamp(ANGLE_MIN, ANGLE_MAX),
            last_send: None,
        }
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_w, self.frame_h)
    }

    /// 当前保持的 (pan, tilt)
    pub fn angles(&self) -> (i32, i32) {
        (self.pan, self.tilt)
    }

    pub fn update(&mut self, bbox: Option<&BBox>) -> bool {
        self.update_at(bbox, Instant::now())
    }

    /// 根据目标框更新云台; 有轴发生变化时返回 true
    pub fn update_at(&mut self, bbox: Option<&BBox>, now: Instant) -> bool {
        let Some(bbox) = bbox else {
            return false;
        };

        let (cx, cy) = bbox.center();
        let dx = cx - self.frame_w as f32 / 2.0;
        let dy = cy - self.frame_h as f32 / 2.0;
        if dx.abs() < self.deadzone && dy.abs() < self.deadzone {
            return false;
        }

        let pan_target = self.next_angle(self.pan, self.kx * dx);
        let tilt_target = self.next_angle(self.tilt, self.ky * dy);

        if let Some(last) = self.last_send {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }

        let mut moved = false;
        for (axis, target) in [(Axis::Pan, pan_target), (Axis::Tilt, tilt_target)] {
            let held = match axis {
                Axis::Pan => &mut self.pan,
                Axis::Tilt => &mut self.tilt,
            };
            if target != *held {
                *held = target;
                self.publisher.send(axis, target);
                self.last_send = Some(now);
                moved = true;
            }
        }
        moved
    }

    fn next_angle(&self, current: i32, offset_deg: f32) -> i32 {
        let cur = current as f32;
        let target = clamp_angle(cur + offset_deg) as f32;
        let smoothed = cur + (target - cur) * self.alpha;

        let mut step = (smoothed - cur).clamp(-self.max_step, self.max_step);
        if step.abs() < self.min_step {
            step = 0.0;
        }
        clamp_angle(cur + step).clamp(current - self.max_move, current + self.max_move)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::MemorySink;

    const TOPIC: &str = "ptz/command";

    fn controller(w: u32, h: u32) -> (Arc<MemorySink>, PtzController) {
        let sink = Arc::new(MemorySink::new());
        let publisher = Arc::new(ActuatorPublisher::new(sink.clone(), TOPIC));
        (sink, PtzController::new(&PtzConfig::default(), w, h, publisher))
    }

    fn box_at(cx: f32, cy: f32) -> BBox {
        BBox::new(cx - 20.0, cy - 40.0, cx + 20.0, cy + 40.0, 0.9)
    }

    #[test]
    fn centered_target_is_a_no_op() {
        let (sink, mut c) = controller(640, 480);
        assert!(!c.update_at(Some(&box_at(320.0, 240.0)), Instant::now()));
        assert!(!c.update_at(Some(&box_at(323.0, 236.0)), Instant::now()));
        assert_eq!(c.angles(), (120, 120));
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn none_holds_position() {
        let (sink, mut c) = controller(640, 480);
        assert!(!c.update_at(None, Instant::now()));
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn target_right_of_center_pans_negative() {
        let (sink, mut c) = controller(640, 480);
        // dx = 300 → 58/640*(-1)*0.6*300 ≈ -16.3°, 平滑后 ≈ -3.3, 限幅 -2
        assert!(c.update_at(Some(&box_at(620.0, 240.0)), Instant::now()));
        assert_eq!(c.angles(), (118, 120));
        assert_eq!(sink.payloads(TOPIC), vec!["pan, 118"]);
    }

    #[test]
    fn updates_within_send_interval_are_suppressed() {
        let (sink, mut c) = controller(640, 480);
        let t0 = Instant::now();
        assert!(c.update_at(Some(&box_at(620.0, 400.0)), t0));
        assert!(!c.update_at(Some(&box_at(620.0, 400.0)), t0 + Duration::from_millis(50)));
        assert!(c.update_at(Some(&box_at(620.0, 400.0)), t0 + Duration::from_millis(130)));
        assert_eq!(sink.payloads(TOPIC).len(), 4);
    }

    #[test]
    fn small_offsets_below_min_step_do_not_move() {
        let (sink, mut c) = controller(640, 480);
        // dx = 7 → 约 -0.38°, 取整后目标与当前相同
        assert!(!c.update_at(Some(&box_at(327.0, 240.0)), Instant::now()));
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn angles_stay_in_range_and_steps_are_bounded() {
        let (sink, mut c) = controller(1280, 720);
        let t0 = Instant::now();
        let mut seed: u32 = 12345;
        let mut next = || {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            (seed >> 8) as f32 / (1u32 << 24) as f32
        };
        let mut prev = c.angles();
        for i in 0..2000 {
            let b = box_at(next() * 1280.0, next() * 720.0);
            c.update_at(Some(&b), t0 + Duration::from_millis(i * 130));
            let (pan, tilt) = c.angles();
            assert!((0..=180).contains(&pan) && (0..=180).contains(&tilt));
            assert!((pan - prev.0).abs() as f32 <= 2.0);
            assert!((tilt - prev.1).abs() as f32 <= 2.0);
            prev = (pan, tilt);
        }

        // 同一轴上相邻两次发送的值不同
        let mut last: [Option<String>; 2] = [None, None];
        for payload in sink.payloads(TOPIC) {
            let (axis, value) = payload.split_once(", ").unwrap();
            let slot = if axis == "pan" { 0 } else { 1 };
            assert_ne!(last[slot].as_deref(), Some(value));
            last[slot] = Some(value.to_string());
        }
    }

    #[test]
    fn drives_toward_corner_until_limit() {
        let (_sink, mut c) = controller(640, 480);
        let t0 = Instant::now();
        for i in 0..500 {
            c.update_at(Some(&box_at(0.0, 0.0)), t0 + Duration::from_millis(i * 200));
        }
        // 目标始终在左上角: pan 趋近 180, tilt 趋近 0; 平滑步长取整后在边界附近停住
        let (pan, tilt) = c.angles();
        assert!(pan > 170 && pan <= 180, "pan = {}", pan);
        assert!(tilt < 10, "tilt = {}", tilt);
    }
}
