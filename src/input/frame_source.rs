//! 帧源 (FrameSource) - 独立采集线程, 只保留最新一帧

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::config::SourceConfig;
use crate::detection::types::Frame;
use crate::error::CaptureError;
use crate::utils::{join_with_timeout, lock, LatestSlot};

/// 采集句柄
pub trait Capture: Send {
    fn open(&mut self) -> Result<(), CaptureError>;

    /// 阻塞读取下一帧
    fn read(&mut self) -> Result<RgbImage, CaptureError>;

    /// 释放句柄, 可重复调用
    fn release(&mut self);

    /// 网络流在读失败后会重新打开
    fn is_network(&self) -> bool;

    fn describe(&self) -> String;
}

/// 每次激活时构造一个新的采集句柄
pub type CaptureFactory = Arc<dyn Fn() -> Box<dyn Capture> + Send + Sync>;

/// 按地址判断是否为网络流
pub fn is_network_url(url: &str) -> bool {
    ["rtsp://", "rtsps://", "rtmp://", "http://", "https://", "udp://", "tcp://"]
        .iter()
        .any(|scheme| url.to_ascii_lowercase().starts_with(scheme))
}

struct Shared {
    slot: LatestSlot<Frame>,
    stop: AtomicBool,
    frames: AtomicU64,
}

/// 帧源
pub struct FrameSource {
    shared: Arc<Shared>,
    capture: Mutex<Option<Box<dyn Capture>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    read_retry: Duration,
    reopen_delay: Duration,
    join_timeout: Duration,
}

impl FrameSource {
    pub fn new(capture: Box<dyn Capture>, config: &SourceConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: LatestSlot::new(),
                stop: AtomicBool::new(false),
                frames: AtomicU64::new(0),
            }),
            capture: Mutex::new(Some(capture)),
            handle: Mutex::new(None),
            read_retry: Duration::from_millis(config.read_retry_ms),
            reopen_delay: Duration::from_millis(config.reopen_delay_ms),
            join_timeout: Duration::from_millis(config.join_timeout_ms),
        }
    }

    /// 打开句柄并启动采集线程. 无法打开时返回 false.
    pub fn start(&self) -> bool {
        let mut handle = lock(&self.handle);
        if handle.is_some() {
            return true;
        }
        let Some(mut capture) = lock(&self.capture).take() else {
            warn!("⚠️ 帧源已停止, 不能再次启动");
            return false;
        };

        let name = capture.describe();
        if let Err(e) = capture.open() {
            error!("❌ 无法打开视频源 {}: {}", name, e);
            capture.release();
            return false;
        }
        info!("🎬 视频源已打开: {}", name);

        self.shared.stop.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let (retry, reopen) = (self.read_retry, self.reopen_delay);
        match thread::Builder::new()
            .name("frame-source".into())
            .spawn(move || capture_loop(shared, capture, retry, reopen))
        {
            Ok(h) => {
                *handle = Some(h);
                true
            }
            Err(e) => {
                error!("❌ 无法启动采集线程: {}", e);
                false
            }
        }
    }

    /// 最新一帧的副本, 从不阻塞
    pub fn read(&self) -> Option<Frame> {
        self.shared.slot.peek()
    }

    /// 已发布的帧数
    pub fn frame_count(&self) -> u64 {
        self.shared.frames.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.handle).as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 停止采集并释放句柄. 线程卡在设备读取中时将其分离, 读取返回后自行释放.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(mut capture) = lock(&self.capture).take() {
            capture.release();
        }
        let Some(handle) = lock(&self.handle).take() else {
            return;
        };
        if join_with_timeout(handle, self.join_timeout) {
            info!("🛑 视频源已停止");
        } else {
            warn!("⚠️ 采集线程未在 {:?} 内退出, 已分离", self.join_timeout);
        }
        self.shared.slot.clear();
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(20)));
    }
}

fn capture_loop(shared: Arc<Shared>, mut capture: Box<dyn Capture>, retry: Duration, reopen: Duration) {
    let network = capture.is_network();
    let mut next_id = 0u64;
    let mut count = 0u32;
    let mut failures = 0u32;
    let mut failing = false;
    let mut last = Instant::now();

    while !shared.stop.load(Ordering::SeqCst) {
        match capture.read() {
            Ok(image) => {
                if failing {
                    info!("✅ 视频源恢复");
                    failing = false;
                }
                next_id += 1;
                shared.slot.put(Frame::new(image, next_id));
                shared.frames.fetch_add(1, Ordering::SeqCst);
                count += 1;
            }
            Err(CaptureError::Timeout) => {
                debug!("读取超时");
            }
            Err(e) => {
                failures += 1;
                if !failing {
                    warn!("⚠️ 读取失败: {}", e);
                    failing = true;
                }
                if network {
                    capture.release();
                    sleep_unless_stopped(&shared.stop, reopen);
                    if shared.stop.load(Ordering::SeqCst) {
                        break;
                    }
                    info!("🔄 重新打开视频源 {}", capture.describe());
                    if let Err(e) = capture.open() {
                        warn!("⚠️ 重新打开失败: {}", e);
                    }
                } else {
                    sleep_unless_stopped(&shared.stop, retry);
                }
            }
        }

        if last.elapsed() >= Duration::from_secs(1) {
            let elapsed = last.elapsed().as_secs_f64();
            debug!(
                "📺 采集统计: {}帧 | {:.1}fps | 失败{}",
                count,
                count as f64 / elapsed,
                failures
            );
            count = 0;
            failures = 0;
            last = Instant::now();
        }
    }

    capture.release();
    debug!("采集线程退出");
}
