//! 门控服务线程 - 门控的唯一执行上下文
//!
//! 信号消息与工作线程的丢失事件经同一通道送入, 依次作用于门控;
//! 边沿回调在锁外执行.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use super::gate::{EventFusionGate, FusionState, GateEdge};
use crate::error::SentinelResult;
use crate::utils::{join_with_timeout, lock};

/// 门控服务的输入
#[derive(Clone, Debug)]
pub enum GateInput {
    Signal {
        topic: String,
        payload: String,
        at: Instant,
    },
    PersonLost {
        at: Instant,
    },
    Shutdown,
}

/// 门控服务
pub struct GateService {
    tx: Sender<GateInput>,
    gate: Arc<Mutex<EventFusionGate>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GateService {
    /// 启动服务线程. `on_edge` 在服务线程上执行.
    pub fn spawn<F>(gate: EventFusionGate, on_edge: F) -> SentinelResult<Self>
    where
        F: FnMut(GateEdge) + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let gate = Arc::new(Mutex::new(gate));
        let thread_gate = Arc::clone(&gate);
        let handle = thread::Builder::new()
            .name("gate-service".into())
            .spawn(move || run(thread_gate, rx, on_edge))?;
        info!("✅ 门控服务启动");
        Ok(Self {
            tx,
            gate,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// 输入通道, 供 MQTT 回调与工作线程使用
    pub fn sender(&self) -> Sender<GateInput> {
        self.tx.clone()
    }

    pub fn submit_signal(&self, topic: &str, payload: &str) {
        let _ = self.tx.send(GateInput::Signal {
            topic: topic.to_string(),
            payload: payload.to_string(),
            at: Instant::now(),
        });
    }

    pub fn person_lost(&self) {
        let _ = self.tx.send(GateInput::PersonLost { at: Instant::now() });
    }

    pub fn snapshot(&self) -> FusionState {
        lock(&self.gate).snapshot()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.gate).is_open()
    }

    /// 停止服务线程 (有界等待)
    pub fn shutdown(&self, timeout: Duration) {
        let Some(handle) = lock(&self.handle).take() else {
            return;
        };
        let _ = self.tx.send(GateInput::Shutdown);
        if !join_with_timeout(handle, timeout) {
            warn!("⚠️ 门控服务未在 {:?} 内退出, 已分离", timeout);
        } else {
            info!("🛑 门控服务已停止");
        }
    }
}

fn run<F>(gate: Arc<Mutex<EventFusionGate>>, rx: Receiver<GateInput>, mut on_edge: F)
where
    F: FnMut(GateEdge),
{
    for input in rx.iter() {
        let edge = match input {
            GateInput::Signal { topic, payload, at } => lock(&gate).on_message(&topic, &payload, at),
            GateInput::PersonLost { at } => {
                let edge = lock(&gate).person_lost(at);
                if edge.is_some() {
                    info!("👤 目标丢失, 关闭门控");
                }
                edge
            }
            GateInput::Shutdown => break,
        };
        if let Some(edge) = edge {
            on_edge(edge);
        }
    }
    debug!("门控服务线程退出");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GateConfig, TopicConfig};

    #[test]
    fn edges_are_delivered_on_service_thread() {
        let gate = EventFusionGate::new(&GateConfig::default(), &TopicConfig::default());
        let (edge_tx, edge_rx) = unbounded();
        let service = GateService::spawn(gate, move |edge| {
            let _ = edge_tx.send(edge);
        })
        .unwrap();

        let t0 = Instant::now();
        let tx = service.sender();
        tx.send(GateInput::Signal {
            topic: "ptz/trigger".into(),
            payload: "1".into(),
            at: t0,
        })
        .unwrap();
        tx.send(GateInput::Signal {
            topic: "ptz/validation".into(),
            payload: "1".into(),
            at: t0 + Duration::from_secs(1),
        })
        .unwrap();
        tx.send(GateInput::PersonLost {
            at: t0 + Duration::from_secs(2),
        })
        .unwrap();
        tx.send(GateInput::PersonLost {
            at: t0 + Duration::from_secs(3),
        })
        .unwrap();

        let timeout = Duration::from_secs(2);
        assert_eq!(edge_rx.recv_timeout(timeout).unwrap(), GateEdge::Opened);
        assert_eq!(edge_rx.recv_timeout(timeout).unwrap(), GateEdge::Closed);
        assert!(edge_rx.recv_timeout(Duration::from_millis(100)).is_err());

        service.shutdown(timeout);
        assert!(!service.is_open());
    }
}
