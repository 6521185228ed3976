//! 告警通道 (Alert channel)
//!
//! 任意线程写入, 恰好一个读取者按 FIFO 顺序取出.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use tracing::{info, warn};

use crate::utils::lock;

/// 告警代码
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCode {
    SystemStarted,
    PersonDetected,
    StationaryBehavior,
    PersonLost,
}

impl AlertCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCode::SystemStarted => "SYSTEM_STARTED",
            AlertCode::PersonDetected => "PERSON_DETECTED",
            AlertCode::StationaryBehavior => "STATIONARY_BEHAVIOR",
            AlertCode::PersonLost => "PERSON_LOST",
        }
    }
}

impl fmt::Display for AlertCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Alert {
    pub code: AlertCode,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl Alert {
    pub fn new(code: AlertCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            timestamp: Local::now(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"code\":\"{}\"}}", self.code))
    }
}

/// 告警发送端, 可克隆给各工作线程
#[derive(Clone, Debug)]
pub struct AlertSender {
    tx: Sender<Alert>,
}

impl AlertSender {
    pub fn send_alert(&self, code: AlertCode, message: impl Into<String>) {
        let alert = Alert::new(code, message);
        info!("🚨 [{}] {}", alert.code, alert.message);
        if self.tx.send(alert).is_err() {
            warn!("⚠️ 告警读取端已关闭, 丢弃告警 {}", code);
        }
    }
}

/// 告警管理器
#[derive(Debug)]
pub struct AlertManager {
    tx: Sender<Alert>,
    rx: Mutex<Option<Receiver<Alert>>>,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertManager {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn sender(&self) -> AlertSender {
        AlertSender {
            tx: self.tx.clone(),
        }
    }

    pub fn send_alert(&self, code: AlertCode, message: impl Into<String>) {
        self.sender().send_alert(code, message);
    }

    /// 取走唯一的读取端; 第二次调用返回 None
    pub fn take_receiver(&self) -> Option<Receiver<Alert>> {
        lock(&self.rx).take()
    }

    /// 读取端仍在管理器内时, 等待下一条告警
    pub fn next_alert(&self, timeout: Duration) -> Option<Alert> {
        let rx = lock(&self.rx).as_ref()?.clone();
        match rx.recv_timeout(timeout) {
            Ok(alert) => Some(alert),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alerts_are_delivered_in_order() {
        let manager = AlertManager::new();
        let sender = manager.sender();
        sender.send_alert(AlertCode::PersonDetected, "PERSON_DETECTED");
        manager.send_alert(AlertCode::PersonLost, "lost");

        let first = manager.next_alert(Duration::from_millis(10)).unwrap();
        let second = manager.next_alert(Duration::from_millis(10)).unwrap();
        assert_eq!(first.code, AlertCode::PersonDetected);
        assert_eq!(second.code, AlertCode::PersonLost);
        assert!(manager.next_alert(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn receiver_can_be_taken_once() {
        let manager = AlertManager::new();
        let rx = manager.take_receiver().unwrap();
        assert!(manager.take_receiver().is_none());
        assert!(manager.next_alert(Duration::from_millis(1)).is_none());

        manager.send_alert(AlertCode::SystemStarted, "up");
        assert_eq!(rx.try_recv().unwrap().code, AlertCode::SystemStarted);
    }

    #[test]
    fn alert_serializes_code_name() {
        let json = Alert::new(AlertCode::StationaryBehavior, "x").to_json();
        assert!(json.contains("\"code\":\"STATIONARY_BEHAVIOR\""));
        assert!(json.contains("\"timestamp\""));
    }
}
