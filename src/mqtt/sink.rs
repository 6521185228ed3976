//! 消息发布边界 (publish sink)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::SinkError;
use crate::utils::lock;

/// 出站消息通道. 实现不得阻塞调用方.
pub trait MessageSink: Send + Sync {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), SinkError>;

    fn is_connected(&self) -> bool {
        true
    }
}

/// 内存发布端, 记录所有成功发布的消息 (测试与离线运行)
#[derive(Debug)]
pub struct MemorySink {
    messages: Mutex<Vec<(String, String)>>,
    connected: AtomicBool,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        lock(&self.messages).clone()
    }

    /// 某个主题上的全部载荷, 按发布顺序
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        lock(&self.messages)
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.messages).clear();
    }
}

impl MessageSink for MemorySink {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::Disconnected);
        }
        lock(&self.messages).push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_sink_rejects() {
        let sink = MemorySink::new();
        sink.publish("a", "1").unwrap();
        sink.set_connected(false);
        assert!(matches!(sink.publish("a", "2"), Err(SinkError::Disconnected)));
        assert_eq!(sink.payloads("a"), vec!["1".to_string()]);
    }
}
