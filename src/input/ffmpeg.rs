//! FFmpeg 采集 (RTSP / 文件 / 本地设备)
//!
//! 解码在独立线程中运行, 帧过滤器把 YUV420P 转成 RGB 后放入单槽;
//! `read()` 等待就绪信号取走最新一帧.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame, Input};
use image::RgbImage;
use tracing::{debug, info, warn};

use super::frame_source::{is_network_url, Capture};
use crate::error::CaptureError;
use crate::utils::LatestSlot;

const MAX_DIMENSION: u32 = 4096;

/// 解码线程与读取端共享的状态
struct DecodeShared {
    slot: LatestSlot<RgbImage>,
    ready: Sender<()>,
    abort: AtomicBool,
    ended: AtomicBool,
}

impl DecodeShared {
    fn notify(&self) {
        let _ = self.ready.try_send(());
    }
}

/// FFmpeg 帧过滤器: YUV420P → RGB
struct RgbFrameFilter {
    shared: Arc<DecodeShared>,
    count: usize,
    dropped: usize,
    total: usize,
    last: Instant,
}

impl RgbFrameFilter {
    fn new(shared: Arc<DecodeShared>) -> Self {
        Self {
            shared,
            count: 0,
            dropped: 0,
            total: 0,
            last: Instant::now(),
        }
    }

    fn drop_frame(&mut self, reason: &str) -> Result<Option<Frame>, String> {
        self.dropped += 1;
        if self.total <= 10 {
            debug!("丢弃帧 #{}: {}", self.total, reason);
        }
        Ok(None)
    }
}

impl FrameFilter for RgbFrameFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        debug!("解码过滤器初始化");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        if self.shared.abort.load(Ordering::SeqCst) {
            return Err("capture released".to_string());
        }
        self.total += 1;

        unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                return self.drop_frame("空帧/损坏帧");
            }
            let raw = &*frame.as_ptr();
            let (w, h) = (raw.width as u32, raw.height as u32);
            if w == 0 || h == 0 || w > MAX_DIMENSION || h > MAX_DIMENSION {
                return self.drop_frame("非法分辨率");
            }
            // 缺少参考帧 / 无效比特流
            if raw.decode_error_flags & 0x03 != 0 {
                return self.drop_frame("解码错误标志");
            }

            let (y_plane, u_plane, v_plane) = (raw.data[0], raw.data[1], raw.data[2]);
            let y_stride = raw.linesize[0] as usize;
            let uv_stride = raw.linesize[1] as usize;
            if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
                return self.drop_frame("YUV指针为空");
            }
            if y_stride < w as usize || uv_stride < (w as usize).div_ceil(2) {
                return self.drop_frame("步长异常");
            }

            let mut rgb = vec![0u8; (w * h * 3) as usize];
            yuv420p_to_rgb(
                y_plane,
                u_plane,
                v_plane,
                y_stride,
                uv_stride,
                &mut rgb,
                w as usize,
                h as usize,
            );
            if let Some(image) = RgbImage::from_raw(w, h, rgb) {
                self.shared.slot.put(image);
                self.shared.notify();
                self.count += 1;
            }
        }

        if self.last.elapsed().as_secs_f64() >= 1.0 {
            let elapsed = self.last.elapsed().as_secs_f64();
            debug!(
                "📺 解码统计: 解码{}帧 | {:.1}fps | 总帧{} | 丢弃{}",
                self.count,
                self.count as f64 / elapsed,
                self.total,
                self.dropped
            );
            self.count = 0;
            self.last = Instant::now();
        }
        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        self.shared.ended.store(true, Ordering::SeqCst);
        self.shared.notify();
        debug!("解码过滤器退出");
    }
}

/// YUV420P → RGB24 (整数近似 BT.601)
///
/// # Safety
/// 三个平面指针必须覆盖 `height` 行, 步长不小于对应平面的宽度.
#[allow(clippy::too_many_arguments)]
unsafe fn yuv420p_to_rgb(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;
        for x in 0..width {
            let yv = *y_plane.add(y_row + x) as i32;
            let u = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;
            buffer[out] = (yv + ((v * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out + 1] = (yv - ((u * 44) >> 7) - ((v * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out + 2] = (yv + ((u * 227) >> 7)).clamp(0, 255) as u8;
            out += 3;
        }
    }
}

/// FFmpeg 采集句柄
pub struct FfmpegCapture {
    url: String,
    read_timeout: Duration,
    shared: Option<Arc<DecodeShared>>,
    ready: Option<Receiver<()>>,
}

impl FfmpegCapture {
    pub fn new(url: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            read_timeout,
            shared: None,
            ready: None,
        }
    }
}

fn build_input(url: &str) -> Input {
    if url.to_ascii_lowercase().starts_with("rtsp") {
        Input::new(url).set_input_opts([("rtsp_transport", "tcp")].into())
    } else {
        Input::new(url)
    }
}

/// 在解码线程内构建并运行 FFmpeg 上下文; 启动结果经 `started` 回报
fn run_decoder(url: String, shared: Arc<DecodeShared>, started: Sender<Result<(), String>>) {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("rgb", Box::new(RgbFrameFilter::new(Arc::clone(&shared))));
    let out = create_null_output().add_frame_pipeline(pipe);

    let scheduler = FfmpegContext::builder()
        .input(build_input(&url))
        .filter_desc("format=yuv420p")
        .output(out)
        .build()
        .map_err(|e| format!("构建失败: {}", e))
        .and_then(|ctx| ctx.start().map_err(|e| format!("启动失败: {}", e)));

    match scheduler {
        Ok(scheduler) => {
            let _ = started.send(Ok(()));
            if let Err(e) = scheduler.wait() {
                if !shared.abort.load(Ordering::SeqCst) {
                    warn!("⚠️ 解码结束: {}: {}", url, e);
                }
            }
        }
        Err(e) => {
            let _ = started.send(Err(e));
        }
    }
    shared.ended.store(true, Ordering::SeqCst);
    shared.notify();
    debug!("解码线程退出: {}", url);
}

impl Capture for FfmpegCapture {
    fn open(&mut self) -> Result<(), CaptureError> {
        self.release();

        let (ready_tx, ready_rx) = bounded(1);
        let shared = Arc::new(DecodeShared {
            slot: LatestSlot::new(),
            ready: ready_tx,
            abort: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        });

        let (started_tx, started_rx) = bounded(1);
        let url = self.url.clone();
        let thread_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("ffmpeg-decode".into())
            .spawn(move || run_decoder(url, thread_shared, started_tx))
            .map_err(|e| CaptureError::Open(e.to_string()))?;

        // 网络流的连接可能较慢, 等待时间取读超时与 10 秒中的较大者
        let wait = self.read_timeout.max(Duration::from_secs(10));
        match started_rx.recv_timeout(wait) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(CaptureError::Open(format!("{}: {}", self.url, e))),
            Err(_) => {
                shared.abort.store(true, Ordering::SeqCst);
                return Err(CaptureError::Open(format!("{}: 启动超时", self.url)));
            }
        }

        info!("✅ FFmpeg 解码启动: {}", self.url);
        self.shared = Some(shared);
        self.ready = Some(ready_rx);
        Ok(())
    }

    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        let (Some(shared), Some(ready)) = (&self.shared, &self.ready) else {
            return Err(CaptureError::Read("capture not open".into()));
        };
        if let Some(image) = shared.slot.take() {
            return Ok(image);
        }
        if shared.ended.load(Ordering::SeqCst) {
            return Err(CaptureError::Ended);
        }
        match ready.recv_timeout(self.read_timeout) {
            Ok(()) => match shared.slot.take() {
                Some(image) => Ok(image),
                None if shared.ended.load(Ordering::SeqCst) => Err(CaptureError::Ended),
                None => Err(CaptureError::Timeout),
            },
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Ended),
        }
    }

    fn release(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.abort.store(true, Ordering::SeqCst);
            debug!("释放 FFmpeg 采集: {}", self.url);
        }
        self.ready = None;
    }

    fn is_network(&self) -> bool {
        is_network_url(&self.url)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuv_gray_converts_to_gray() {
        let (w, h) = (4usize, 2usize);
        let y = vec![128u8; w * h];
        let u = vec![128u8; w / 2];
        let v = vec![128u8; w / 2];
        let mut rgb = vec![0u8; w * h * 3];
        unsafe {
            yuv420p_to_rgb(y.as_ptr(), u.as_ptr(), v.as_ptr(), w, w / 2, &mut rgb, w, h);
        }
        assert!(rgb.iter().all(|&c| c == 128));
    }

    #[test]
    fn read_before_open_fails() {
        let mut cap = FfmpegCapture::new("rtsp://127.0.0.1:1/none", Duration::from_millis(10));
        assert!(matches!(cap.read(), Err(CaptureError::Read(_))));
        assert!(cap.is_network());
        cap.release();
    }
}
