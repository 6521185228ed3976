// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod alerts; // 告警通道
pub mod config; // 命令行与配置文件
pub mod detection; // 检测/跟踪工作线程
pub mod error;
pub mod fusion; // 存在信号融合门控
pub mod input; // 视频输入系统
pub mod mqtt; // broker 连接与发布
pub mod notify; // 静止行为分析通知
pub mod ptz; // 云台闭环控制
pub mod systems; // 生命周期与输出
pub mod utils;

pub use crate::alerts::{Alert, AlertCode, AlertManager};
pub use crate::config::{Args, SentinelConfig};
pub use crate::error::{SentinelError, SentinelResult};
pub use crate::systems::{Sentinel, SentinelParts};
