/// 检测系统 (Detection System)
///
/// 独立工作线程, 负责人员检测与跟踪
/// - capability:  检测器/跟踪器边界
/// - track_state: Searching/Tracking 状态与静止判定
/// - worker:      单槽交接的处理线程
/// - annotate:    输出画面叠加
pub mod annotate;
pub mod capability;
pub mod track_state;
pub mod types;
pub mod worker;

pub use annotate::OverlayFont;
pub use capability::{IdleDetector, IdleTracker, PersonDetector, PersonTracker, TrackOutcome};
pub use track_state::{StationaryParams, TrackMode, TrackState};
pub use types::{best_detection, BBox, Frame, Mask};
pub use worker::{DetectionTrackingWorker, WorkerOutput};
