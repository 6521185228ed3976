//! 双信号融合门控 (EventFusionGate)
//!
//! 两路异步 "1"/"0" 信号, 各自超时; 有效值 AND 后经防抖决定门控开关.
//! 只在消息到达时重新计算, 时间由调用方传入.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{GateConfig, GatePolicy, TopicConfig};

/// 信号编号
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalId {
    /// 被动感知 (CSI)
    Passive,
    /// 验证相机
    Validation,
}

impl SignalId {
    pub const ALL: [SignalId; 2] = [SignalId::Passive, SignalId::Validation];

    fn index(self) -> usize {
        match self {
            SignalId::Passive => 0,
            SignalId::Validation => 1,
        }
    }
}

/// 单路信号状态
#[derive(Clone, Debug)]
pub struct SignalState {
    pub topic: String,
    pub value: bool,
    pub last_seen: Option<Instant>,
    pub timeout: Duration,
}

impl SignalState {
    fn new(topic: &str, timeout: Duration) -> Self {
        Self {
            topic: topic.to_string(),
            value: false,
            last_seen: None,
            timeout,
        }
    }

    /// 超时或从未收到时为 false
    pub fn effective(&self, now: Instant) -> bool {
        self.value
            && self
                .last_seen
                .is_some_and(|seen| now.saturating_duration_since(seen) <= self.timeout)
    }
}

/// 门控边沿
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateEdge {
    Opened,
    Closed,
}

/// 门控状态快照
#[derive(Clone, Debug)]
pub struct FusionState {
    pub signals: [SignalState; 2],
    pub gate_open: bool,
    pub last_transition: Option<Instant>,
}

impl FusionState {
    pub fn signal(&self, id: SignalId) -> &SignalState {
        &self.signals[id.index()]
    }
}

/// 融合门控
#[derive(Debug)]
pub struct EventFusionGate {
    state: FusionState,
    policy: GatePolicy,
    debounce: Duration,
    close_on_person_lost: bool,
    lost_bypasses_debounce: bool,
}

impl EventFusionGate {
    pub fn new(config: &GateConfig, topics: &TopicConfig) -> Self {
        Self {
            state: FusionState {
                signals: [
                    SignalState::new(&topics.passive_signal, config.passive_timeout()),
                    SignalState::new(&topics.validation_signal, config.validation_timeout()),
                ],
                gate_open: false,
                last_transition: None,
            },
            policy: config.policy,
            debounce: config.debounce(),
            close_on_person_lost: config.close_on_person_lost,
            lost_bypasses_debounce: config.lost_bypasses_debounce,
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.state.signals.iter().map(|s| s.topic.clone()).collect()
    }

    pub fn signal_for_topic(&self, topic: &str) -> Option<SignalId> {
        SignalId::ALL
            .into_iter()
            .find(|id| self.state.signals[id.index()].topic == topic)
    }

    pub fn is_open(&self) -> bool {
        self.state.gate_open
    }

    pub fn snapshot(&self) -> FusionState {
        self.state.clone()
    }

    /// 处理一条入站消息, 产生边沿时返回
    pub fn on_message(&mut self, topic: &str, payload: &str, now: Instant) -> Option<GateEdge> {
        let Some(id) = self.signal_for_topic(topic) else {
            debug!("忽略未知主题 {}", topic);
            return None;
        };
        let value = match payload.trim() {
            "1" => true,
            "0" => false,
            other => {
                warn!("⚠️ {} 上的载荷无法识别: {:?}", topic, other);
                return None;
            }
        };
        self.on_signal(id, value, now)
    }

    pub fn on_signal(&mut self, id: SignalId, value: bool, now: Instant) -> Option<GateEdge> {
        let signal = &mut self.state.signals[id.index()];
        signal.value = value;
        signal.last_seen = Some(now);

        let both = SignalId::ALL
            .iter()
            .all(|id| self.state.signals[id.index()].effective(now));
        let candidate = match self.policy {
            GatePolicy::AndTimeout => both,
            // 打开后只看已保存的值, 不看超时; 防抖期间收到的 "0" 不会丢失
            GatePolicy::ExplicitTrigger if self.state.gate_open => SignalId::ALL
                .iter()
                .all(|id| self.state.signals[id.index()].value),
            GatePolicy::ExplicitTrigger => both,
        };

        if self.in_debounce(now) || candidate == self.state.gate_open {
            return None;
        }
        Some(self.transition(candidate, now))
    }

    /// 工作线程报告目标丢失. 已关闭时无操作.
    pub fn person_lost(&mut self, now: Instant) -> Option<GateEdge> {
        if !self.close_on_person_lost || !self.state.gate_open {
            return None;
        }
        if !self.lost_bypasses_debounce && self.in_debounce(now) {
            return None;
        }
        Some(self.transition(false, now))
    }

    fn in_debounce(&self, now: Instant) -> bool {
        self.state
            .last_transition
            .is_some_and(|t| now.saturating_duration_since(t) < self.debounce)
    }

    fn transition(&mut self, open: bool, now: Instant) -> GateEdge {
        self.state.gate_open = open;
        self.state.last_transition = Some(now);
        if open {
            info!("🟢 门控打开");
            GateEdge::Opened
        } else {
            info!("🔴 门控关闭");
            GateEdge::Closed
        }
    }
}
