//! 输出线程 (VideoOutput)
//!
//! 活动时: 取最新帧交给工作线程, 用新的输出驱动云台, 编码 JPEG.
//! 非活动时: 按较慢节拍输出占位画面.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use tracing::{debug, info, warn};

use super::supervisor::StreamSupervisor;
use crate::config::{OutputConfig, PtzConfig};
use crate::detection::annotate::placeholder_frame;
use crate::detection::OverlayFont;
use crate::error::SentinelResult;
use crate::ptz::{ActuatorPublisher, PtzController};
use crate::utils::{join_with_timeout, lock, LatestSlot};

/// JPEG 编码
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Option<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let result = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode_image(image);
    match result {
        Ok(()) => Some(buf.into_inner()),
        Err(e) => {
            warn!("⚠️ JPEG 编码失败: {}", e);
            None
        }
    }
}

struct OutputLoop {
    supervisor: Arc<StreamSupervisor>,
    publisher: Arc<ActuatorPublisher>,
    ptz_config: PtzConfig,
    config: OutputConfig,
    font: Option<OverlayFont>,
    jpeg: Arc<LatestSlot<Arc<Vec<u8>>>>,
    stop: Arc<AtomicBool>,
    controller: Option<PtzController>,
    last_frame_id: Option<u64>,
    last_seq: u64,
}

impl OutputLoop {
    fn run(mut self) {
        let tick = Duration::from_millis(self.config.tick_ms.max(1));
        let placeholder_tick = Duration::from_millis(self.config.placeholder_tick_ms.max(1));
        let mut encoded = 0u32;
        let mut last = Instant::now();

        while !self.stop.load(Ordering::SeqCst) {
            let wait = if self.supervisor.is_active() {
                if self.active_step() {
                    encoded += 1;
                }
                tick
            } else {
                self.inactive_step();
                placeholder_tick
            };

            if last.elapsed() >= Duration::from_secs(1) {
                if encoded > 0 {
                    debug!("🖼️ 输出统计: {}帧/s", encoded);
                }
                encoded = 0;
                last = Instant::now();
            }
            thread::sleep(wait);
        }
        debug!("输出线程退出");
    }

    /// 有新帧时处理一次, 返回是否产生了新画面
    fn active_step(&mut self) -> bool {
        let Some(frame) = self.supervisor.read_frame() else {
            return false;
        };
        if self.last_frame_id == Some(frame.frame_id) {
            return false;
        }
        self.last_frame_id = Some(frame.frame_id);

        let output = self.supervisor.worker().process_frame(frame);
        if output.seq != 0 && output.seq != self.last_seq {
            self.last_seq = output.seq;
            let (w, h) = (output.frame.width(), output.frame.height());
            // 画面尺寸变化时按新尺寸重建
            if self.controller.as_ref().map(PtzController::frame_size) != Some((w, h)) {
                self.controller = Some(PtzController::new(
                    &self.ptz_config,
                    w,
                    h,
                    Arc::clone(&self.publisher),
                ));
            }
            if let Some(controller) = &mut self.controller {
                controller.update(output.bbox.as_ref());
            }
        }

        match encode_jpeg(&output.frame.image, self.config.jpeg_quality) {
            Some(bytes) => {
                self.jpeg.put(Arc::new(bytes));
                true
            }
            None => false,
        }
    }

    fn inactive_step(&mut self) {
        if self.controller.take().is_some() {
            debug!("云台控制器已释放");
        }
        self.last_frame_id = None;
        self.last_seq = 0;
        let image = placeholder_frame(
            self.config.placeholder_width,
            self.config.placeholder_height,
            self.font.as_ref(),
        );
        if let Some(bytes) = encode_jpeg(&image, self.config.jpeg_quality) {
            self.jpeg.put(Arc::new(bytes));
        }
    }
}

/// 输出线程句柄
pub struct VideoOutput {
    jpeg: Arc<LatestSlot<Arc<Vec<u8>>>>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl VideoOutput {
    pub fn spawn(
        supervisor: Arc<StreamSupervisor>,
        publisher: Arc<ActuatorPublisher>,
        ptz_config: PtzConfig,
        config: OutputConfig,
        font: Option<OverlayFont>,
    ) -> SentinelResult<Self> {
        let jpeg = Arc::new(LatestSlot::new());
        let stop = Arc::new(AtomicBool::new(false));
        let output_loop = OutputLoop {
            supervisor,
            publisher,
            ptz_config,
            config,
            font,
            jpeg: Arc::clone(&jpeg),
            stop: Arc::clone(&stop),
            controller: None,
            last_frame_id: None,
            last_seq: 0,
        };
        let handle = thread::Builder::new()
            .name("video-output".into())
            .spawn(move || output_loop.run())?;
        info!("✅ 输出线程启动");
        Ok(Self {
            jpeg,
            stop,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// 最新编码画面 (活动画面或占位画面)
    pub fn latest_jpeg(&self) -> Option<Arc<Vec<u8>>> {
        self.jpeg.peek()
    }

    pub fn stop(&self, timeout: Duration) {
        let Some(handle) = lock(&self.handle).take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        if !join_with_timeout(handle, timeout) {
            warn!("⚠️ 输出线程未在 {:?} 内退出, 已分离", timeout);
        }
    }
}

impl Drop for VideoOutput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_has_soi_marker() {
        let image = RgbImage::from_pixel(32, 24, image::Rgb([200, 10, 10]));
        let bytes = encode_jpeg(&image, 60).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
