//! 云台指令发布 - 每轴幂等, 断线期间记录待发角度, 重连后补发

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::mqtt::MessageSink;
use crate::utils::lock;

/// 云台轴
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Pan,
    Tilt,
}

impl Axis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Pan => "pan",
            Axis::Tilt => "tilt",
        }
    }

    fn index(self) -> usize {
        match self {
            Axis::Pan => 0,
            Axis::Tilt => 1,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 指令载荷 "pan, 120"
pub fn command_payload(axis: Axis, angle: i32) -> String {
    format!("{}, {}", axis, angle)
}

#[derive(Debug, Default)]
struct AxisLedger {
    last_sent: [Option<i32>; 2],
    pending: [Option<i32>; 2],
}

/// 执行器指令发布器
pub struct ActuatorPublisher {
    sink: Arc<dyn MessageSink>,
    topic: String,
    ledger: Mutex<AxisLedger>,
}

impl ActuatorPublisher {
    pub fn new(sink: Arc<dyn MessageSink>, topic: impl Into<String>) -> Self {
        Self {
            sink,
            topic: topic.into(),
            ledger: Mutex::new(AxisLedger::default()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 发送一个轴的目标角度, 实际发出时返回 true.
    /// 与该轴上次发出的值相同则不发; 发布失败只记录为待发, 不向上抛出.
    pub fn send(&self, axis: Axis, angle: i32) -> bool {
        let angle = angle.clamp(0, 180);
        let mut ledger = lock(&self.ledger);
        let i = axis.index();
        if ledger.last_sent[i] == Some(angle) {
            ledger.pending[i] = None;
            return false;
        }
        match self.sink.publish(&self.topic, &command_payload(axis, angle)) {
            Ok(()) => {
                debug!("🎯 {} → {}", axis, angle);
                ledger.last_sent[i] = Some(angle);
                ledger.pending[i] = None;
                true
            }
            Err(e) => {
                if ledger.pending[i].is_none() {
                    warn!("⚠️ 云台指令 {} {} 未发出 ({}), 等待重连补发", axis, angle, e);
                }
                ledger.pending[i] = Some(angle);
                false
            }
        }
    }

    /// 补发断线期间的待发角度, 返回实际发出的条数
    pub fn flush_pending(&self) -> usize {
        let pending: Vec<(Axis, i32)> = {
            let ledger = lock(&self.ledger);
            [Axis::Pan, Axis::Tilt]
                .into_iter()
                .filter_map(|axis| ledger.pending[axis.index()].map(|a| (axis, a)))
                .collect()
        };
        let sent = pending
            .into_iter()
            .filter(|&(axis, angle)| self.send(axis, angle))
            .count();
        if sent > 0 {
            info!("🔁 重连后补发 {} 条云台指令", sent);
        }
        sent
    }

    pub fn last_sent(&self, axis: Axis) -> Option<i32> {
        lock(&self.ledger).last_sent[axis.index()]
    }

    pub fn pending(&self, axis: Axis) -> Option<i32> {
        lock(&self.ledger).pending[axis.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::MemorySink;

    fn publisher() -> (Arc<MemorySink>, ActuatorPublisher) {
        let sink = Arc::new(MemorySink::new());
        let publisher = ActuatorPublisher::new(sink.clone(), "ptz/command");
        (sink, publisher)
    }

    #[test]
    fn identical_values_are_not_retransmitted() {
        let (sink, p) = publisher();
        assert!(p.send(Axis::Pan, 120));
        assert!(!p.send(Axis::Pan, 120));
        assert!(p.send(Axis::Tilt, 120));
        assert!(p.send(Axis::Pan, 121));
        assert_eq!(
            sink.payloads("ptz/command"),
            vec!["pan, 120", "tilt, 120", "pan, 121"]
        );
    }

    #[test]
    fn pending_angle_is_replayed_after_reconnect() {
        let (sink, p) = publisher();
        p.send(Axis::Pan, 100);
        sink.set_connected(false);
        assert!(!p.send(Axis::Pan, 101));
        assert!(!p.send(Axis::Pan, 102));
        assert_eq!(p.pending(Axis::Pan), Some(102));

        sink.set_connected(true);
        assert_eq!(p.flush_pending(), 1);
        assert_eq!(p.last_sent(Axis::Pan), Some(102));
        assert_eq!(p.pending(Axis::Pan), None);
        assert_eq!(sink.payloads("ptz/command"), vec!["pan, 100", "pan, 102"]);
    }

    #[test]
    fn pending_equal_to_last_sent_is_dropped() {
        let (sink, p) = publisher();
        p.send(Axis::Tilt, 90);
        sink.set_connected(false);
        p.send(Axis::Tilt, 91);
        // 断线期间又回到已发出的值
        p.send(Axis::Tilt, 90);
        sink.set_connected(true);
        assert_eq!(p.flush_pending(), 0);
        assert_eq!(sink.payloads("ptz/command"), vec!["tilt, 90"]);
    }

    #[test]
    fn out_of_range_angles_are_clamped() {
        let (sink, p) = publisher();
        p.send(Axis::Pan, 250);
        p.send(Axis::Tilt, -5);
        assert_eq!(sink.payloads("ptz/command"), vec!["pan, 180", "tilt, 0"]);
    }
}
