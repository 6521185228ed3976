//! 数字卫兵应用上下文 (Sentinel)
//!
//! 显式构建并持有全部组件, 没有进程级全局状态.
//! 关闭顺序: 门控 → 输出 → 流水线 (工作线程 → 视频源).
//! 信号监听 (MQTT 连接) 由调用方在此之前关闭.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{error, info, warn};

use super::output::VideoOutput;
use super::supervisor::StreamSupervisor;
use crate::alerts::{AlertCode, AlertManager};
use crate::config::SentinelConfig;
use crate::detection::{DetectionTrackingWorker, OverlayFont, PersonDetector, PersonTracker};
use crate::error::SentinelResult;
use crate::fusion::{EventFusionGate, FusionState, GateEdge, GateInput, GateService};
use crate::input::CaptureFactory;
use crate::mqtt::{MessageHandler, MessageSink};
use crate::notify::StationaryNotifier;
use crate::ptz::ActuatorPublisher;

/// 构建上下文所需的外部组件
pub struct SentinelParts {
    pub detector: Box<dyn PersonDetector>,
    pub tracker: Box<dyn PersonTracker>,
    pub capture_factory: CaptureFactory,
    pub sink: Arc<dyn MessageSink>,
    pub notifier: Option<Arc<dyn StationaryNotifier>>,
    pub font: Option<OverlayFont>,
}

/// 应用上下文
pub struct Sentinel {
    alerts: AlertManager,
    publisher: Arc<ActuatorPublisher>,
    supervisor: Arc<StreamSupervisor>,
    gate: GateService,
    output: VideoOutput,
    signal_topics: Vec<String>,
    join_timeout: Duration,
    closed: AtomicBool,
}

fn edge_handler(
    supervisor: Arc<StreamSupervisor>,
    sink: Arc<dyn MessageSink>,
    topic: String,
) -> impl FnMut(GateEdge) + Send + 'static {
    move |edge| {
        let payload = match edge {
            GateEdge::Opened => "on",
            GateEdge::Closed => "off",
        };
        match sink.publish(&topic, payload) {
            Ok(()) => info!("📡 {} → {}", topic, payload),
            Err(e) => warn!("⚠️ 流控制消息发送失败 ({}): {}", payload, e),
        }
        match edge {
            GateEdge::Opened => {
                if !supervisor.activate() {
                    error!("❌ 门控已打开, 但流水线未能启动");
                }
            }
            GateEdge::Closed => supervisor.deactivate(),
        }
    }
}

impl Sentinel {
    pub fn build(config: &SentinelConfig, parts: SentinelParts) -> SentinelResult<Self> {
        config.validate()?;

        let alerts = AlertManager::new();
        let publisher = Arc::new(ActuatorPublisher::new(
            Arc::clone(&parts.sink),
            config.topics.actuator.clone(),
        ));

        let mut worker = DetectionTrackingWorker::new(
            parts.detector,
            parts.tracker,
            &config.worker,
            alerts.sender(),
        )
        .with_font(parts.font.clone());
        if let Some(notifier) = parts.notifier {
            worker = worker.with_notifier(notifier);
        }
        let worker = Arc::new(worker);

        let supervisor = Arc::new(StreamSupervisor::new(
            parts.capture_factory,
            config.source.clone(),
            Arc::clone(&worker),
        ));

        let fusion = EventFusionGate::new(&config.gate, &config.topics);
        let signal_topics = fusion.topics();
        let gate = GateService::spawn(
            fusion,
            edge_handler(
                Arc::clone(&supervisor),
                Arc::clone(&parts.sink),
                config.topics.stream_control.clone(),
            ),
        )?;
        if config.gate.close_on_person_lost {
            worker.set_loss_channel(gate.sender());
        }

        let output = VideoOutput::spawn(
            Arc::clone(&supervisor),
            Arc::clone(&publisher),
            config.ptz.clone(),
            config.output.clone(),
            parts.font,
        )?;

        alerts.send_alert(AlertCode::SystemStarted, "SYSTEM_STARTED");
        info!("🚀 数字卫兵已就绪, 等待触发信号");
        Ok(Self {
            alerts,
            publisher,
            supervisor,
            gate,
            output,
            signal_topics,
            join_timeout: Duration::from_millis(config.worker.join_timeout_ms),
            closed: AtomicBool::new(false),
        })
    }

    /// 入站消息回调, 交给 MQTT 连接; 消息转入门控服务线程
    pub fn message_handler(&self) -> MessageHandler {
        let tx: Sender<GateInput> = self.gate.sender();
        Arc::new(move |topic: &str, payload: &str| {
            let _ = tx.send(GateInput::Signal {
                topic: topic.to_string(),
                payload: payload.to_string(),
                at: Instant::now(),
            });
        })
    }

    /// 需要订阅的两个信号主题
    pub fn signal_topics(&self) -> &[String] {
        &self.signal_topics
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    pub fn publisher(&self) -> &Arc<ActuatorPublisher> {
        &self.publisher
    }

    pub fn latest_jpeg(&self) -> Option<Arc<Vec<u8>>> {
        self.output.latest_jpeg()
    }

    pub fn force_redetect(&self) {
        self.supervisor.worker().force_redetect();
    }

    pub fn gate_state(&self) -> FusionState {
        self.gate.snapshot()
    }

    pub fn is_active(&self) -> bool {
        self.supervisor.is_active()
    }

    /// 按序关闭; 可重复调用
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("🛑 数字卫兵关闭中...");
        self.gate.shutdown(self.join_timeout);
        self.output.stop(self.join_timeout);
        self.supervisor.deactivate();
        info!("👋 数字卫兵已关闭");
    }
}

impl Drop for Sentinel {
    fn drop(&mut self) {
        self.shutdown();
    }
}
