//! 流水线生命周期管理 (StreamSupervisor)
//!
//! 门控打开: 新建帧源并启动, 启动工作线程. 门控关闭: 停止两者并把工作线程复位.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{error, info};

use crate::config::SourceConfig;
use crate::detection::types::Frame;
use crate::detection::DetectionTrackingWorker;
use crate::input::{CaptureFactory, FrameSource};
use crate::utils::lock;

pub struct StreamSupervisor {
    factory: CaptureFactory,
    source_config: SourceConfig,
    worker: Arc<DetectionTrackingWorker>,
    source: Mutex<Option<Arc<FrameSource>>>, // 只做读取或替换
    transition: Mutex<()>,                   // 串行化启停
    active: AtomicBool,
}

impl StreamSupervisor {
    pub fn new(
        factory: CaptureFactory,
        source_config: SourceConfig,
        worker: Arc<DetectionTrackingWorker>,
    ) -> Self {
        Self {
            factory,
            source_config,
            worker,
            source: Mutex::new(None),
            transition: Mutex::new(()),
            active: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn worker(&self) -> &Arc<DetectionTrackingWorker> {
        &self.worker
    }

    /// 启动帧源与工作线程; 已激活时直接返回 true, 帧源打不开时返回 false
    pub fn activate(&self) -> bool {
        let _guard = lock(&self.transition);
        if self.is_active() {
            return true;
        }

        let source = Arc::new(FrameSource::new((self.factory)(), &self.source_config));
        if !source.start() {
            error!("❌ 流水线激活失败: 视频源无法打开");
            return false;
        }
        if !self.worker.start() {
            source.stop();
            return false;
        }

        *lock(&self.source) = Some(source);
        self.active.store(true, Ordering::SeqCst);
        info!("▶️ 流水线已激活");
        true
    }

    /// 停止工作线程与帧源, 工作线程回到 Searching. 未激活时无操作.
    pub fn deactivate(&self) {
        let _guard = lock(&self.transition);
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let source = lock(&self.source).take();

        self.worker.stop();
        self.worker.reset();
        if let Some(source) = source {
            source.stop();
        }
        info!("⏸️ 流水线已停止");
    }

    /// 当前帧源的最新帧; 未激活时返回 None
    pub fn read_frame(&self) -> Option<Frame> {
        let source = lock(&self.source).clone()?;
        source.read()
    }
}
