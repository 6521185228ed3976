//! 错误类型 (Error types)
//!
//! 只有构建阶段允许快速失败; 运行中的循环吞掉错误并记录日志.

use thiserror::Error;

pub type SentinelResult<T> = Result<T, SentinelError>;

/// 构建/启动阶段的错误
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error("Font error: {0}")]
    Font(String),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SentinelError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// 采集句柄错误
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("cannot open capture: {0}")]
    Open(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("no frame within read timeout")]
    Timeout,

    #[error("stream ended")]
    Ended,
}

/// 检测/跟踪能力在单帧上的失败
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CapabilityError(pub String);

impl CapabilityError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// 发布层错误 (不会向控制器抛出)
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("not connected")]
    Disconnected,

    #[error("publish rejected: {0}")]
    Rejected(String),
}
