/// 视频输入系统 (Video Input System)
///
/// 独立采集线程, 只保留最新一帧
/// - FrameSource:        采集循环 + 单槽 + 网络流重连
/// - TestPatternCapture: 合成测试图案
/// - FfmpegCapture:      RTSP/文件/设备解码 (feature `ffmpeg`)
pub mod frame_source;
pub mod test_pattern;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

pub use frame_source::{is_network_url, Capture, CaptureFactory, FrameSource};
pub use test_pattern::TestPatternCapture;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegCapture;
