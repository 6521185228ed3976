//! 静止行为分析通知 (best-effort HTTP POST)

use std::thread;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::NotifyConfig;

/// 发给分析服务的请求体
#[derive(Clone, Debug, Serialize)]
pub struct StationaryPayload {
    pub signal_type: &'static str,
    pub bbox_normalized: [f32; 4],
    pub metadata: Value,
}

impl StationaryPayload {
    pub fn new(bbox_normalized: [f32; 4], metadata: Value) -> Self {
        Self {
            signal_type: "stationary_behavior",
            bbox_normalized,
            metadata,
        }
    }
}

/// 静止事件的带外通知; 实现不得阻塞调用线程
pub trait StationaryNotifier: Send + Sync {
    fn notify(&self, payload: StationaryPayload);
}

/// 通过 HTTP POST 通知分析服务, 每次通知一个后台线程, 失败只记日志
#[derive(Clone, Debug)]
pub struct AnalysisNotifier {
    url: String,
    timeout: Duration,
}

impl AnalysisNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    /// 配置中关闭时返回 None
    pub fn from_config(config: &NotifyConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.url.clone(), Duration::from_millis(config.timeout_ms)))
    }

    fn post(url: &str, timeout: Duration, payload: &StationaryPayload) {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        match agent.post(url).send_json(payload) {
            Ok(_) => debug!("📤 已发送静止目标框 {:?}", payload.bbox_normalized),
            Err(e) => warn!("⚠️ 静止通知发送失败: {}", e),
        }
    }
}

impl StationaryNotifier for AnalysisNotifier {
    fn notify(&self, payload: StationaryPayload) {
        let url = self.url.clone();
        let timeout = self.timeout;
        let spawned = thread::Builder::new()
            .name("stationary-notify".into())
            .spawn(move || Self::post(&url, timeout, &payload));
        if let Err(e) = spawned {
            warn!("⚠️ 无法启动通知线程: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_shape() {
        let p = StationaryPayload::new([0.1, 0.2, 0.3, 0.4], serde_json::json!({"source": "test"}));
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["signal_type"], "stationary_behavior");
        assert_eq!(v["bbox_normalized"].as_array().unwrap().len(), 4);
        assert_eq!(v["metadata"]["source"], "test");
    }

    #[test]
    fn disabled_config_yields_no_notifier() {
        let config = NotifyConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(AnalysisNotifier::from_config(&config).is_none());
    }

    #[test]
    fn unreachable_endpoint_is_swallowed() {
        // 端口 9 (discard) 通常拒绝连接; 只要求不 panic, 不阻塞调用方
        let n = AnalysisNotifier::new("http://127.0.0.1:9/trigger", Duration::from_millis(200));
        n.notify(StationaryPayload::new([0.0; 4], Value::Null));
    }
}
