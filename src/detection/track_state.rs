//! 检测/跟踪状态机的状态 (TrackState) 与静止判定
//! Searching/Tracking mode plus the stationary dwell timer

use std::time::{Duration, Instant};

/// 工作模式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackMode {
    /// 每帧运行检测器
    Searching,
    /// 每帧运行跟踪器
    Tracking,
}

/// 静止判定参数
#[derive(Clone, Copy, Debug)]
pub struct StationaryParams {
    pub max_shift_px: f32,
    pub dwell: Duration,
}

impl Default for StationaryParams {
    fn default() -> Self {
        Self {
            max_shift_px: 5.0,
            dwell: Duration::from_secs(3),
        }
    }
}

/// 跟踪状态
///
/// `stationary_since` 只在 `Tracking` 模式下有值; 目标移动超过阈值或丢失时清除.
#[derive(Clone, Debug)]
pub struct TrackState {
    mode: TrackMode,
    last_center: Option<(f32, f32)>,
    stationary_since: Option<Instant>,
    params: StationaryParams,
}

impl TrackState {
    pub fn new(params: StationaryParams) -> Self {
        Self {
            mode: TrackMode::Searching,
            last_center: None,
            stationary_since: None,
            params,
        }
    }

    pub fn mode(&self) -> TrackMode {
        self.mode
    }

    pub fn last_center(&self) -> Option<(f32, f32)> {
        self.last_center
    }

    pub fn stationary_since(&self) -> Option<Instant> {
        self.stationary_since
    }

    /// Searching → Tracking
    pub fn begin_tracking(&mut self) {
        self.mode = TrackMode::Tracking;
        self.last_center = None;
        self.stationary_since = None;
    }

    /// 回到 Searching, 清除所有跟踪局部状态
    pub fn reset(&mut self) {
        self.mode = TrackMode::Searching;
        self.last_center = None;
        self.stationary_since = None;
    }

    /// 静止判定. 连续停留满 `dwell` 时返回一次 true, 之后必须移动超过阈值才会重新计时
    pub fn check_stationary(&mut self, center: (f32, f32), now: Instant) -> bool {
        if self.mode != TrackMode::Tracking {
            return false;
        }

        let Some((lx, ly)) = self.last_center else {
            self.last_center = Some(center);
            self.stationary_since = Some(now);
            return false;
        };

        let dist = (center.0 - lx).hypot(center.1 - ly);
        if dist < self.params.max_shift_px {
            if let Some(since) = self.stationary_since {
                if now.saturating_duration_since(since) >= self.params.dwell {
                    self.stationary_since = None;
                    return true;
                }
            }
        } else {
            // 移动: 以新位置重新计时
            self.last_center = Some(center);
            self.stationary_since = Some(now);
        }
        false
    }
}
