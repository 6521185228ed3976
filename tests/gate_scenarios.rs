use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ptz_sentinel::config::{GateConfig, GatePolicy, PtzConfig, TopicConfig};
use ptz_sentinel::detection::BBox;
use ptz_sentinel::fusion::{EventFusionGate, GateEdge, GateInput, GateService};
use ptz_sentinel::mqtt::MemorySink;
use ptz_sentinel::ptz::{ActuatorPublisher, Axis, PtzController};

fn at(t0: Instant, secs: f64) -> Instant {
    t0 + Duration::from_secs_f64(secs)
}

#[test]
fn test_two_signal_scenario_through_service() {
    let topics = TopicConfig::default();
    let gate = EventFusionGate::new(&GateConfig::default(), &topics);
    let edges = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&edges);
    let service = GateService::spawn(gate, move |edge| recorded.lock().unwrap().push(edge)).unwrap();
    let tx = service.sender();

    let t0 = Instant::now();
    let signal = |topic: &str, payload: &str, t: f64| GateInput::Signal {
        topic: topic.to_string(),
        payload: payload.to_string(),
        at: at(t0, t),
    };
    tx.send(signal(&topics.passive_signal, "1", 0.0)).unwrap();
    tx.send(signal(&topics.validation_signal, "1", 1.0)).unwrap();
    // 验证信号停止; 下一条消息在 4.01s 到达时验证信号已超时
    tx.send(signal(&topics.passive_signal, "1", 4.01)).unwrap();
    // 再次丢失不产生新的边沿
    tx.send(GateInput::PersonLost { at: at(t0, 4.5) }).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while edges.lock().unwrap().len() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    service.shutdown(Duration::from_secs(1));
    assert_eq!(*edges.lock().unwrap(), vec![GateEdge::Opened, GateEdge::Closed]);
    assert!(!service.is_open());
}

#[test]
fn test_explicit_trigger_ignores_staleness() {
    let topics = TopicConfig::default();
    let config = GateConfig {
        policy: GatePolicy::ExplicitTrigger,
        debounce_s: 0.0,
        ..GateConfig::default()
    };
    let mut gate = EventFusionGate::new(&config, &topics);
    let t0 = Instant::now();

    assert_eq!(gate.on_message(&topics.passive_signal, "1", t0), None);
    assert_eq!(
        gate.on_message(&topics.validation_signal, "1", at(t0, 0.5)),
        Some(GateEdge::Opened)
    );
    // 验证信号早已超时, 但只有显式 "0" 才关闭
    assert_eq!(gate.on_message(&topics.passive_signal, "1", at(t0, 30.0)), None);
    assert!(gate.is_open());
    assert_eq!(
        gate.on_message(&topics.validation_signal, "0", at(t0, 31.0)),
        Some(GateEdge::Closed)
    );
}

#[test]
fn test_ptz_commands_replayed_after_reconnect() {
    let sink = Arc::new(MemorySink::new());
    let publisher = Arc::new(ActuatorPublisher::new(sink.clone(), "ptz/command"));
    let mut ptz = PtzController::new(&PtzConfig::default(), 640, 480, Arc::clone(&publisher));
    let t0 = Instant::now();
    let left = BBox::new(40.0, 200.0, 80.0, 280.0, 0.9);

    sink.set_connected(false);
    assert!(ptz.update_at(Some(&left), t0));
    // 断线时角度照常保持
    let (pan, _) = ptz.angles();
    assert_ne!(pan, 120);
    assert!(sink.messages().is_empty());
    assert_eq!(publisher.pending(Axis::Pan), Some(pan));

    sink.set_connected(true);
    assert_eq!(publisher.flush_pending(), 1);
    assert_eq!(sink.payloads("ptz/command"), vec![format!("pan, {}", pan)]);
    assert_eq!(publisher.pending(Axis::Pan), None);
    assert_eq!(publisher.flush_pending(), 0);
}
