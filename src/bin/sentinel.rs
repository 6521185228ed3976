/// 数字卫兵 (Digital Sentinel)
///
/// 存在门控的人员跟踪与云台控制
///
/// 系统架构:
/// 1. MQTT 网络线程: 接收两路存在信号, 发布流控制与云台指令
/// 2. 门控服务线程: 信号融合 + 防抖, 驱动流水线启停
/// 3. 采集线程 + 检测/跟踪线程: 仅在门控打开时运行
/// 4. 输出线程:   云台闭环 + JPEG 输出
/// 5. 主线程:     标准输入命令 (r = 重新检测, q = 退出)
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ptz_sentinel::detection::{IdleDetector, IdleTracker, OverlayFont};
use ptz_sentinel::input::{Capture, CaptureFactory, TestPatternCapture};
use ptz_sentinel::mqtt::{MessageSink, MqttLink};
use ptz_sentinel::notify::{AnalysisNotifier, StationaryNotifier};
use ptz_sentinel::{Args, Sentinel, SentinelConfig, SentinelParts};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const TEST_PATTERN_SIZE: (u32, u32) = (640, 480);
const TEST_PATTERN_FPS: u32 = 25;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ptz_sentinel=info,sentinel=info,rumqttc=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// 视频源工厂: `test` 使用测试图案, 其余地址走 FFmpeg
fn capture_factory(config: &SentinelConfig) -> CaptureFactory {
    let url = config.source.url.clone();
    if url != "test" {
        #[cfg(feature = "ffmpeg")]
        {
            let timeout = Duration::from_millis(config.source.read_timeout_ms);
            info!("📹 视频源: {}", url);
            return Arc::new(move || -> Box<dyn Capture> {
                Box::new(ptz_sentinel::input::FfmpegCapture::new(url.clone(), timeout))
            });
        }
        #[cfg(not(feature = "ffmpeg"))]
        warn!("⚠️ 未启用 ffmpeg 特性, 无法打开 {}, 改用测试图案", url);
    }
    info!("🧪 视频源: 测试图案 {}x{}", TEST_PATTERN_SIZE.0, TEST_PATTERN_SIZE.1);
    Arc::new(|| -> Box<dyn Capture> {
        Box::new(TestPatternCapture::new(
            TEST_PATTERN_SIZE.0,
            TEST_PATTERN_SIZE.1,
            TEST_PATTERN_FPS,
        ))
    })
}

fn load_font(config: &SentinelConfig) -> Option<OverlayFont> {
    let path = config.output.font_path.as_ref()?;
    match OverlayFont::load(path) {
        Ok(font) => {
            info!("✅ 字体加载成功: {}", path);
            Some(font)
        }
        Err(e) => {
            warn!("⚠️ 字体加载失败, 画面不叠加文字: {}", e);
            None
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    info!("🚀 数字卫兵系统启动");
    let mut config = SentinelConfig::load(&args.config)
        .with_context(|| format!("无法加载配置 {}", args.config))?;
    config.apply_args(&args);
    config.validate()?;
    config.print_summary();

    // ========== MQTT 连接 ==========
    let subscriptions = vec![
        config.topics.passive_signal.clone(),
        config.topics.validation_signal.clone(),
    ];
    let link = Arc::new(MqttLink::connect(&config.mqtt, subscriptions)?);
    if !link.wait_connected(Duration::from_secs(3)) {
        warn!("⚠️ 暂未连接到 broker, 后台继续重试");
    }

    // ========== 应用上下文 ==========
    let notifier = AnalysisNotifier::from_config(&config.notify)
        .map(|n| Arc::new(n) as Arc<dyn StationaryNotifier>);
    let parts = SentinelParts {
        // 检测/跟踪后端通过 SentinelParts 注入, 这里使用空实现
        detector: Box::new(IdleDetector),
        tracker: Box::new(IdleTracker),
        capture_factory: capture_factory(&config),
        sink: Arc::clone(&link) as Arc<dyn MessageSink>,
        notifier,
        font: load_font(&config),
    };
    let sentinel = Arc::new(Sentinel::build(&config, parts)?);
    link.set_handler(sentinel.message_handler());
    let publisher = Arc::clone(sentinel.publisher());
    link.add_connect_hook(move || {
        publisher.flush_pending();
    });

    // ========== 告警日志线程 ==========
    if let Some(rx) = sentinel.alerts().take_receiver() {
        thread::Builder::new()
            .name("alert-log".into())
            .spawn(move || {
                for alert in rx.iter() {
                    debug!("🔔 {}", alert.to_json());
                }
            })?;
    }

    // ========== 快照线程 ==========
    let running = Arc::new(AtomicBool::new(true));
    if let Some(path) = args.snapshot.clone() {
        let sentinel = Arc::clone(&sentinel);
        let running = Arc::clone(&running);
        let interval = Duration::from_millis(args.snapshot_interval_ms.max(50));
        thread::Builder::new()
            .name("snapshot".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    if let Some(jpeg) = sentinel.latest_jpeg() {
                        if let Err(e) = std::fs::write(&path, jpeg.as_slice()) {
                            error!("❌ 快照写入失败 {}: {}", path, e);
                        }
                    }
                    thread::sleep(interval);
                }
            })?;
    }

    // ========== 主线程: 命令输入 ==========
    info!("⌨️  命令: r = 重新检测, q = 退出");
    let stdin = std::io::stdin();
    let mut quit = false;
    for line in stdin.lock().lines() {
        match line?.trim() {
            "r" => {
                sentinel.force_redetect();
                info!("🔄 已请求重新检测");
            }
            "q" => {
                quit = true;
                break;
            }
            "" => {}
            other => warn!("未知命令: {}", other),
        }
    }
    if !quit {
        // 标准输入已关闭 (后台运行), 一直运行到进程被终止
        info!("标准输入已关闭, 后台运行中");
        loop {
            thread::park();
        }
    }

    running.store(false, Ordering::SeqCst);
    link.shutdown(Duration::from_secs(2));
    sentinel.shutdown();
    Ok(())
}
