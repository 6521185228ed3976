//! 检测/跟踪工作线程 (DetectionTrackingWorker)
//!
//! 单槽输入 + 单槽输出 + 唤醒信号. 新帧直接覆盖未处理的旧帧; 读取最新输出从不阻塞.
//! 状态机: Searching (每帧检测) → Tracking (每帧跟踪) → 丢失后回到 Searching.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::annotate::{draw_bbox, draw_crosshair, draw_mask, draw_timestamp, OverlayFont};
use super::capability::{PersonDetector, PersonTracker, TrackOutcome};
use super::track_state::{StationaryParams, TrackMode, TrackState};
use super::types::{best_detection, BBox, Frame, Mask};
use crate::alerts::{AlertCode, AlertSender};
use crate::config::WorkerConfig;
use crate::error::CapabilityError;
use crate::fusion::GateInput;
use crate::notify::{StationaryNotifier, StationaryPayload};
use crate::utils::{join_with_timeout, lock, LatestSlot};

/// 工作线程的一次输出
#[derive(Clone, Debug)]
pub struct WorkerOutput {
    pub frame: Frame,          // 叠加后的画面
    pub bbox: Option<BBox>,    // 本帧目标框
    pub seq: u64,              // 输出序号, 从 1 开始
}

/// 单帧能力调用, panic 与错误都视为本帧无结果
fn guarded<T>(what: &str, f: impl FnOnce() -> Result<T, CapabilityError>) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(v)) => Some(v),
        Ok(Err(e)) => {
            warn!("⚠️ {}失败: {}", what, e);
            None
        }
        Err(_) => {
            error!("❌ {} panic, 本帧视为无结果", what);
            None
        }
    }
}

/// 处理状态: 能力实现 + 跟踪状态, 跨重启保留
struct WorkerCore {
    detector: Box<dyn PersonDetector>,
    tracker: Box<dyn PersonTracker>,
    state: TrackState,
    mask_threshold: f32,
    font: Option<OverlayFont>,
    alerts: AlertSender,
    loss_tx: Option<Sender<GateInput>>,
    notifier: Option<Arc<dyn StationaryNotifier>>,
    lost_at: Option<Instant>, // 待上报的丢失事件, 由处理线程决定是否发出
}

impl WorkerCore {
    fn process(&mut self, frame: &Frame, redetect: bool, now: Instant) -> (RgbImage, Option<BBox>) {
        if redetect {
            debug!("🔄 强制重新检测");
            self.tracker.reset();
            self.state.reset();
        }

        let mut disp = frame.image.clone();
        draw_crosshair(&mut disp);
        if let Some(font) = &self.font {
            draw_timestamp(&mut disp, font);
        }

        let bbox = match self.state.mode() {
            TrackMode::Searching => self.search(frame, &mut disp),
            TrackMode::Tracking => self.track(frame, &mut disp, now),
        };
        (disp, bbox)
    }

    fn search(&mut self, frame: &Frame, disp: &mut RgbImage) -> Option<BBox> {
        let detector = &mut self.detector;
        let boxes = guarded("检测", || detector.detect(frame)).unwrap_or_default();
        let best = best_detection(&boxes)?;

        let tracker = &mut self.tracker;
        guarded("跟踪初始化", || tracker.init(frame, &[best]))?;

        self.state.begin_tracking();
        draw_bbox(disp, &best);
        info!(
            "🎯 [帧{}] 检测到人员, 置信度 {:.2}, 进入跟踪",
            frame.frame_id, best.confidence
        );
        self.alerts.send_alert(AlertCode::PersonDetected, "PERSON_DETECTED");
        Some(best)
    }

    fn track(&mut self, frame: &Frame, disp: &mut RgbImage, now: Instant) -> Option<BBox> {
        let tracker = &mut self.tracker;
        let outcome = guarded("跟踪", || tracker.track(frame)).unwrap_or(TrackOutcome::Lost);

        let bbox = match outcome {
            TrackOutcome::Lost => None,
            TrackOutcome::Boxes(boxes) => best_detection(&boxes),
            TrackOutcome::Masks(masks) => self.mask_bbox(&masks, frame, disp),
        };

        let Some(bbox) = bbox else {
            self.on_lost(frame, now);
            return None;
        };

        draw_bbox(disp, &bbox);
        if self.state.check_stationary(bbox.center(), now) {
            self.on_stationary(frame, &bbox);
        }
        Some(bbox)
    }

    /// 多个非空掩码时以最后一个为准
    fn mask_bbox(&self, masks: &[Mask], frame: &Frame, disp: &mut RgbImage) -> Option<BBox> {
        let (w, h) = (frame.width(), frame.height());
        let mut found = None;
        for mask in masks {
            if let Some(b) = mask.bbox(self.mask_threshold, w, h) {
                draw_mask(disp, mask, self.mask_threshold);
                found = Some(b);
            }
        }
        found
    }

    fn on_lost(&mut self, frame: &Frame, now: Instant) {
        info!("👋 [帧{}] 跟踪丢失, 回到检测模式", frame.frame_id);
        self.tracker.reset();
        self.state.reset();
        self.alerts.send_alert(AlertCode::PersonLost, "PERSON_LOST");
        self.lost_at = Some(now);
    }

    fn report_loss(&mut self) {
        if let (Some(at), Some(tx)) = (self.lost_at.take(), &self.loss_tx) {
            let _ = tx.send(GateInput::PersonLost { at });
        }
    }

    fn on_stationary(&self, frame: &Frame, bbox: &BBox) {
        self.alerts.send_alert(
            AlertCode::StationaryBehavior,
            "STATIONARY BEHAVIOR DETECTED: analysis required",
        );
        if let Some(notifier) = &self.notifier {
            let payload = StationaryPayload::new(
                bbox.normalized(frame.width(), frame.height()),
                serde_json::json!({
                    "source": "ptz_sentinel",
                    "frame_id": frame.frame_id,
                }),
            );
            notifier.notify(payload);
        }
    }
}

/// 线程间共享的交接状态
struct Shared {
    input: LatestSlot<Frame>,
    output: LatestSlot<WorkerOutput>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    redetect: AtomicBool,
    tracking: AtomicBool,
    seq: AtomicU64,
}

impl Shared {
    fn wake(&self) {
        // 容量为 1, 已有未消费的唤醒时直接丢弃
        let _ = self.wake_tx.try_send(());
    }
}

/// 一次启动对应的线程句柄与它独有的停止标志
struct RunHandle {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// 检测/跟踪工作线程
pub struct DetectionTrackingWorker {
    shared: Arc<Shared>,
    core: Arc<Mutex<WorkerCore>>,
    run: Mutex<Option<RunHandle>>,
    wake_poll: Duration,
    join_timeout: Duration,
}

impl DetectionTrackingWorker {
    pub fn new(
        detector: Box<dyn PersonDetector>,
        tracker: Box<dyn PersonTracker>,
        config: &WorkerConfig,
        alerts: AlertSender,
    ) -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        let params = StationaryParams {
            max_shift_px: config.stationary_px,
            dwell: Duration::from_secs_f64(config.stationary_s.max(0.0)),
        };
        Self {
            shared: Arc::new(Shared {
                input: LatestSlot::new(),
                output: LatestSlot::new(),
                wake_tx,
                wake_rx,
                redetect: AtomicBool::new(false),
                tracking: AtomicBool::new(false),
                seq: AtomicU64::new(0),
            }),
            core: Arc::new(Mutex::new(WorkerCore {
                detector,
                tracker,
                state: TrackState::new(params),
                mask_threshold: config.mask_threshold,
                font: None,
                alerts,
                loss_tx: None,
                notifier: None,
                lost_at: None,
            })),
            run: Mutex::new(None),
            wake_poll: Duration::from_millis(config.wake_poll_ms.max(1)),
            join_timeout: Duration::from_millis(config.join_timeout_ms),
        }
    }

    pub fn with_font(self, font: Option<OverlayFont>) -> Self {
        lock(&self.core).font = font;
        self
    }

    /// 丢失事件同时送往门控服务
    pub fn set_loss_channel(&self, tx: Sender<GateInput>) {
        lock(&self.core).loss_tx = Some(tx);
    }

    pub fn with_notifier(self, notifier: Arc<dyn StationaryNotifier>) -> Self {
        lock(&self.core).notifier = Some(notifier);
        self
    }

    pub fn is_running(&self) -> bool {
        lock(&self.run).as_ref().is_some_and(|r| !r.handle.is_finished())
    }

    /// 启动处理线程; 已在运行时直接返回 true.
    /// 每次启动使用新的停止标志, 之前分离的线程不会被重新唤醒.
    pub fn start(&self) -> bool {
        let mut current = lock(&self.run);
        if current.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return true;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let core = Arc::clone(&self.core);
        let token = Arc::clone(&stop);
        let poll = self.wake_poll;
        match thread::Builder::new()
            .name("detect-track".into())
            .spawn(move || run(shared, core, token, poll))
        {
            Ok(handle) => {
                *current = Some(RunHandle { handle, stop });
                info!("✅ 检测/跟踪线程启动");
                true
            }
            Err(e) => {
                error!("❌ 无法启动检测/跟踪线程: {}", e);
                false
            }
        }
    }

    /// 停止处理线程 (有界等待). 可重复调用.
    pub fn stop(&self) {
        let Some(RunHandle { handle, stop }) = lock(&self.run).take() else {
            return;
        };
        stop.store(true, Ordering::SeqCst);
        self.shared.wake();
        if join_with_timeout(handle, self.join_timeout) {
            info!("🛑 检测/跟踪线程已停止");
        } else {
            warn!("⚠️ 检测/跟踪线程未在 {:?} 内退出, 已分离", self.join_timeout);
        }
    }

    /// 提交一帧 (覆盖未处理的旧帧) 并立即返回最新输出.
    /// 还没有任何输出时返回原帧, 序号为 0.
    pub fn process_frame(&self, frame: Frame) -> WorkerOutput {
        let latest = self.shared.output.peek().unwrap_or_else(|| WorkerOutput {
            frame: frame.clone(),
            bbox: None,
            seq: 0,
        });
        self.shared.input.put(frame);
        self.shared.wake();
        latest
    }

    /// 最新输出, 不阻塞
    pub fn latest_output(&self) -> Option<WorkerOutput> {
        self.shared.output.peek()
    }

    /// 下一次处理强制进入 Searching
    pub fn force_redetect(&self) {
        self.shared.redetect.store(true, Ordering::SeqCst);
        self.shared.tracking.store(false, Ordering::SeqCst);
    }

    /// 回到 Searching 并清空输入/输出槽
    pub fn reset(&self) {
        self.force_redetect();
        self.shared.input.clear();
        self.shared.output.clear();
    }

    pub fn mode(&self) -> TrackMode {
        if self.shared.tracking.load(Ordering::SeqCst) {
            TrackMode::Tracking
        } else {
            TrackMode::Searching
        }
    }
}

impl Drop for DetectionTrackingWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(shared: Arc<Shared>, core: Arc<Mutex<WorkerCore>>, stop: Arc<AtomicBool>, poll: Duration) {
    let mut count = 0u32;
    let mut busy = Duration::ZERO;
    let mut last = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        match shared.wake_rx.recv_timeout(poll) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let Some(frame) = shared.input.take() else {
            continue;
        };

        let start = Instant::now();
        let redetect = shared.redetect.swap(false, Ordering::SeqCst);
        let (image, bbox) = {
            let mut core = lock(&core);
            let result = core.process(&frame, redetect, start);
            // 处理期间已被停止 (可能已分离): 丢弃结果, 不上报丢失
            if stop.load(Ordering::SeqCst) {
                core.lost_at = None;
                break;
            }
            shared
                .tracking
                .store(core.state.mode() == TrackMode::Tracking, Ordering::SeqCst);
            core.report_loss();
            result
        };

        let seq = shared.seq.fetch_add(1, Ordering::SeqCst) + 1;
        shared.output.put(WorkerOutput {
            frame: Frame {
                image,
                frame_id: frame.frame_id,
                captured_at: frame.captured_at,
            },
            bbox,
            seq,
        });

        count += 1;
        busy += start.elapsed();
        if last.elapsed() >= Duration::from_secs(1) {
            let elapsed = last.elapsed().as_secs_f64();
            info!(
                "📊 处理统计: {}帧 | {:.1}fps | 每帧{:.1}ms",
                count,
                count as f64 / elapsed,
                busy.as_secs_f64() * 1000.0 / count as f64
            );
            count = 0;
            busy = Duration::ZERO;
            last = Instant::now();
        }
    }
    debug!("检测/跟踪线程退出");
}
