/// 系统架构 (System Architecture)
///
/// 门控服务线程驱动流水线启停, 输出线程消费流水线:
/// - StreamSupervisor: 按门控边沿启停视频源与检测/跟踪线程
/// - VideoOutput:      取帧 → 检测/跟踪 → 云台 → JPEG (独立线程)
/// - Sentinel:         应用上下文, 构建并按序关闭全部组件
pub mod output;
pub mod sentinel;
pub mod supervisor;

pub use output::{encode_jpeg, VideoOutput};
pub use sentinel::{Sentinel, SentinelParts};
pub use supervisor::StreamSupervisor;
