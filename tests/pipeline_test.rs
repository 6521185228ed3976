use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ptz_sentinel::detection::{BBox, Frame, PersonDetector, PersonTracker, TrackOutcome};
use ptz_sentinel::error::CapabilityError;
use ptz_sentinel::input::{Capture, CaptureFactory, TestPatternCapture};
use ptz_sentinel::mqtt::{MemorySink, MessageSink};
use ptz_sentinel::{AlertCode, Sentinel, SentinelConfig, SentinelParts};

const PASSIVE: &str = "ptz/trigger";
const VALIDATION: &str = "ptz/validation";
const STREAM: &str = "ptz/stream";
const COMMAND: &str = "ptz/command";

/// 目标始终位于画面左侧
fn left_person() -> BBox {
    BBox::new(50.0, 200.0, 110.0, 320.0, 0.9)
}

struct FixedDetector;

impl PersonDetector for FixedDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<BBox>, CapabilityError> {
        Ok(vec![left_person()])
    }
}

/// 初始化后每帧返回同一个框; `lose` 为 true 时立即报告丢失
struct FixedTracker {
    lose: bool,
}

impl PersonTracker for FixedTracker {
    fn init(&mut self, _frame: &Frame, _seeds: &[BBox]) -> Result<(), CapabilityError> {
        Ok(())
    }

    fn track(&mut self, _frame: &Frame) -> Result<TrackOutcome, CapabilityError> {
        if self.lose {
            Ok(TrackOutcome::Lost)
        } else {
            Ok(TrackOutcome::Boxes(vec![left_person()]))
        }
    }

    fn reset(&mut self) {}
}

fn build(lose: bool) -> (Arc<MemorySink>, Sentinel) {
    let mut config = SentinelConfig::default();
    config.gate.debounce_s = 0.0;
    config.output.tick_ms = 5;
    config.output.placeholder_tick_ms = 20;

    let sink = Arc::new(MemorySink::new());
    let factory: CaptureFactory =
        Arc::new(|| -> Box<dyn Capture> { Box::new(TestPatternCapture::new(640, 480, 50)) });
    let parts = SentinelParts {
        detector: Box::new(FixedDetector),
        tracker: Box::new(FixedTracker { lose }),
        capture_factory: factory,
        sink: Arc::clone(&sink) as Arc<dyn MessageSink>,
        notifier: None,
        font: None,
    };
    let sentinel = Sentinel::build(&config, parts).unwrap();
    (sink, sentinel)
}

fn wait_for(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {}", what);
}

#[test]
fn test_gate_drives_pipeline_and_ptz() {
    let (sink, sentinel) = build(false);
    let handler = sentinel.message_handler();
    assert_eq!(sentinel.signal_topics(), &[PASSIVE.to_string(), VALIDATION.to_string()]);

    // 未触发时输出占位画面
    wait_for("placeholder", Duration::from_secs(2), || sentinel.latest_jpeg().is_some());
    assert!(!sentinel.is_active());

    // 只有一路信号不打开门控
    handler(PASSIVE, "1");
    thread::sleep(Duration::from_millis(100));
    assert!(!sentinel.is_active());
    assert!(sink.payloads(STREAM).is_empty());

    handler(VALIDATION, "1");
    wait_for("activation", Duration::from_secs(3), || sentinel.is_active());
    assert_eq!(sink.payloads(STREAM), vec!["on"]);
    assert!(sentinel.gate_state().gate_open);

    // 目标在左侧, 云台应开始转动
    wait_for("ptz command", Duration::from_secs(5), || !sink.payloads(COMMAND).is_empty());
    for payload in sink.payloads(COMMAND) {
        let (axis, angle) = payload.split_once(", ").unwrap();
        assert!(axis == "pan" || axis == "tilt");
        let angle: i32 = angle.parse().unwrap();
        assert!((0..=180).contains(&angle));
    }

    // 重复的 "1" 不产生新的边沿
    handler(PASSIVE, "1");
    handler(VALIDATION, "0");
    wait_for("deactivation", Duration::from_secs(3), || !sentinel.is_active());
    assert_eq!(sink.payloads(STREAM), vec!["on", "off"]);

    sentinel.shutdown();
    sentinel.shutdown();
}

#[test]
fn test_person_lost_closes_gate() {
    let (sink, sentinel) = build(true);
    let handler = sentinel.message_handler();

    handler(PASSIVE, "1");
    handler(VALIDATION, "1");
    wait_for("off after loss", Duration::from_secs(5), || {
        sink.payloads(STREAM) == vec!["on", "off"]
    });
    wait_for("deactivation", Duration::from_secs(3), || !sentinel.is_active());
    assert!(!sentinel.gate_state().gate_open);

    // 两路信号仍然有效, 但门控只在消息到达时重新计算
    thread::sleep(Duration::from_millis(200));
    assert_eq!(sink.payloads(STREAM), vec!["on", "off"]);

    let codes: Vec<AlertCode> =
        std::iter::from_fn(|| sentinel.alerts().next_alert(Duration::from_millis(50)))
            .map(|a| a.code)
            .collect();
    assert_eq!(codes.first(), Some(&AlertCode::SystemStarted));
    assert!(codes.contains(&AlertCode::PersonDetected));
    assert!(codes.contains(&AlertCode::PersonLost));

    sentinel.shutdown();
}

#[test]
fn test_malformed_signals_are_ignored() {
    let (sink, sentinel) = build(false);
    let handler = sentinel.message_handler();

    handler(PASSIVE, "yes");
    handler(VALIDATION, "1");
    handler("some/other/topic", "1");
    thread::sleep(Duration::from_millis(200));
    assert!(!sentinel.is_active());
    assert!(sink.payloads(STREAM).is_empty());

    handler(PASSIVE, " 1\n");
    wait_for("activation", Duration::from_secs(3), || sentinel.is_active());
    sentinel.shutdown();
}
