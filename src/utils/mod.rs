/// 工具模块
/// Utility modules
pub mod slot;
pub mod thread;

pub use slot::LatestSlot;
pub use thread::{join_with_timeout, lock};
