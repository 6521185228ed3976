//! 检测/跟踪能力边界 (Detection / tracking capability boundary)
//!
//! 检测器与跟踪器是外部黑盒: 帧 → 检测框, 帧 + 种子框 → 掩码.
//! 工作线程只依赖这里的 trait.

use super::types::{BBox, Frame, Mask};
use crate::error::CapabilityError;

/// 跟踪器单帧输出
#[derive(Clone, Debug)]
pub enum TrackOutcome {
    /// 跟踪器明确报告目标丢失
    Lost,
    Boxes(Vec<BBox>),
    Masks(Vec<Mask>),
}

/// 人员检测器, 每次调用无状态
pub trait PersonDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BBox>, CapabilityError>;
}

/// 人员跟踪器, 在 `init` 与 `reset` 之间保持内部状态
pub trait PersonTracker: Send {
    /// 用检测框初始化 (或重新初始化) 跟踪
    fn init(&mut self, frame: &Frame, seeds: &[BBox]) -> Result<(), CapabilityError>;

    fn track(&mut self, frame: &Frame) -> Result<TrackOutcome, CapabilityError>;

    /// 丢弃跟踪状态
    fn reset(&mut self);
}

/// 空闲检测器: 未接入模型后端时使用, 从不返回结果
#[derive(Debug, Default)]
pub struct IdleDetector;

impl PersonDetector for IdleDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<BBox>, CapabilityError> {
        Ok(Vec::new())
    }
}

/// 空闲跟踪器: 总是报告丢失
#[derive(Debug, Default)]
pub struct IdleTracker;

impl PersonTracker for IdleTracker {
    fn init(&mut self, _frame: &Frame, _seeds: &[BBox]) -> Result<(), CapabilityError> {
        Ok(())
    }

    fn track(&mut self, _frame: &Frame) -> Result<TrackOutcome, CapabilityError> {
        Ok(TrackOutcome::Lost)
    }

    fn reset(&mut self) {}
}
