//! 系统配置 - 命令行参数 + JSON 配置文件
//! Configuration: clap command-line arguments and a JSON parameter file

use std::fs;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SentinelError, SentinelResult};

/// 时间类参数的上限 (秒), 超出时 `Duration` 转换会溢出
const MAX_DURATION_S: f64 = 86_400.0;

/// 数字卫兵参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "数字卫兵 - 存在门控的人员跟踪与云台控制", long_about = None)]
pub struct Args {
    /// JSON 配置文件 (不存在时写入默认值)
    #[arg(short, long, default_value = "sentinel.json", env = "SENTINEL_CONFIG")]
    pub config: String,

    /// 视频源: RTSP/HTTP 地址, 文件路径, 或 `test` 使用测试图案
    #[arg(short, long, env = "SENTINEL_SOURCE")]
    pub source: Option<String>,

    /// MQTT broker 地址 (覆盖配置文件)
    #[arg(short, long, env = "SENTINEL_BROKER")]
    pub broker: Option<String>,

    /// MQTT broker 端口 (覆盖配置文件)
    #[arg(short, long, env = "SENTINEL_BROKER_PORT")]
    pub port: Option<u16>,

    /// 叠加文字使用的 TTF/OTF 字体 (可选)
    #[arg(long, env = "SENTINEL_FONT")]
    pub font: Option<String>,

    /// 周期性写出最新输出帧 (JPEG)
    #[arg(long)]
    pub snapshot: Option<String>,

    /// 快照写出间隔 (毫秒)
    #[arg(long, default_value_t = 1000)]
    pub snapshot_interval_ms: u64,
}

/// MQTT 连接参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub reconnect_delay_ms: u64, // 断线后重连前的等待
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: format!("ptz_sentinel_{}", std::process::id()),
            keep_alive_secs: 60,
            reconnect_delay_ms: 2000,
        }
    }
}

/// 主题名称
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub passive_signal: String,    // CSI 被动感知信号 "1"/"0"
    pub validation_signal: String, // 验证相机信号 "1"/"0"
    pub stream_control: String,    // "on"/"off"
    pub actuator: String,          // "pan, 120"
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            passive_signal: "ptz/trigger".to_string(),
            validation_signal: "ptz/validation".to_string(),
            stream_control: "ptz/stream".to_string(),
            actuator: "ptz/command".to_string(),
        }
    }
}

/// 门控关闭策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    /// 两路有效值 AND, 超时视为 false, 任意一路失效即关闭
    AndTimeout,
    /// 打开规则相同; 打开后只有显式 "0" 才关闭
    ExplicitTrigger,
}

/// 融合门控参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub policy: GatePolicy,
    pub passive_timeout_s: f64,
    pub validation_timeout_s: f64,
    pub debounce_s: f64,
    pub close_on_person_lost: bool,
    pub lost_bypasses_debounce: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            policy: GatePolicy::AndTimeout,
            passive_timeout_s: 5.0,
            validation_timeout_s: 3.0,
            debounce_s: 3.0,
            close_on_person_lost: true,
            lost_bypasses_debounce: true,
        }
    }
}

impl GateConfig {
    pub fn passive_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.passive_timeout_s)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.validation_timeout_s)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs_f64(self.debounce_s)
    }
}

/// 云台闭环控制参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PtzConfig {
    pub init_pan: i32,
    pub init_tilt: i32,
    pub hfov_deg: f32,
    pub vfov_deg: f32,
    pub pan_dir: i32,  // ±1
    pub tilt_dir: i32, // ±1
    pub deadzone_px: f32,
    pub max_step_deg: f32,
    pub min_step_deg: f32,
    pub smooth_alpha: f32,
    pub gain_scale: f32,
    pub min_send_interval_s: f64,
}

impl Default for PtzConfig {
    fn default() -> Self {
        Self {
            init_pan: 120,
            init_tilt: 120,
            hfov_deg: 58.0,
            vfov_deg: 41.0,
            pan_dir: -1,
            tilt_dir: 1,
            deadzone_px: 6.0,
            max_step_deg: 2.0,
            min_step_deg: 0.05,
            smooth_alpha: 0.2,
            gain_scale: 0.6,
            min_send_interval_s: 0.12,
        }
    }
}

/// 检测/跟踪工作线程参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub stationary_px: f32,
    pub stationary_s: f64,
    pub mask_threshold: f32,
    pub wake_poll_ms: u64, // 等待唤醒信号时检查停止标志的周期
    pub join_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stationary_px: 5.0,
            stationary_s: 3.0,
            mask_threshold: 0.5,
            wake_poll_ms: 100,
            join_timeout_ms: 2000,
        }
    }
}

/// 视频源参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub url: String,
    pub read_timeout_ms: u64,
    pub read_retry_ms: u64,
    pub reopen_delay_ms: u64,
    pub join_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "test".to_string(),
            read_timeout_ms: 2000,
            read_retry_ms: 20,
            reopen_delay_ms: 1000,
            join_timeout_ms: 2000,
        }
    }
}

/// 静止行为分析通知
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://localhost:5100/trigger_recording".to_string(),
            timeout_ms: 1000,
        }
    }
}

/// 输出流参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub jpeg_quality: u8,
    pub tick_ms: u64,             // 活动时的输出节拍
    pub placeholder_tick_ms: u64, // 非活动时的占位帧节拍
    pub placeholder_width: u32,
    pub placeholder_height: u32,
    pub font_path: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 60,
            tick_ms: 10,
            placeholder_tick_ms: 100,
            placeholder_width: 640,
            placeholder_height: 480,
            font_path: None,
        }
    }
}

/// 完整配置
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub mqtt: MqttConfig,
    pub topics: TopicConfig,
    pub gate: GateConfig,
    pub ptz: PtzConfig,
    pub worker: WorkerConfig,
    pub source: SourceConfig,
    pub notify: NotifyConfig,
    pub output: OutputConfig,
}

impl SentinelConfig {
    /// 从JSON文件加载配置; 文件不存在时写入默认配置
    pub fn load(path: impl AsRef<Path>) -> SentinelResult<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => {
                let config: Self = serde_json::from_str(&json)?;
                config.validate()?;
                info!("✅ 配置已从 {} 加载", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("📝 配置文件不存在,创建默认配置: {}", path.display());
                let config = Self::default();
                config.save(path)?;
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> SentinelResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        info!("💾 配置已保存到 {}", path.as_ref().display());
        Ok(())
    }

    /// 命令行参数覆盖配置文件
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(source) = &args.source {
            self.source.url = source.clone();
        }
        if let Some(host) = &args.broker {
            self.mqtt.host = host.clone();
        }
        if let Some(port) = args.port {
            self.mqtt.port = port;
        }
        if let Some(font) = &args.font {
            self.output.font_path = Some(font.clone());
        }
    }

    pub fn validate(&self) -> SentinelResult<()> {
        let g = &self.gate;
        if g.passive_timeout_s <= 0.0 || g.validation_timeout_s <= 0.0 || g.debounce_s < 0.0 {
            return Err(SentinelError::config("gate timeouts must be positive"));
        }
        let durations = [
            ("passive_timeout_s", g.passive_timeout_s),
            ("validation_timeout_s", g.validation_timeout_s),
            ("debounce_s", g.debounce_s),
            ("min_send_interval_s", self.ptz.min_send_interval_s),
            ("stationary_s", self.worker.stationary_s),
        ];
        for (name, secs) in durations {
            if !(0.0..=MAX_DURATION_S).contains(&secs) {
                return Err(SentinelError::config(format!(
                    "{} must be within 0..={} seconds",
                    name, MAX_DURATION_S
                )));
            }
        }
        let p = &self.ptz;
        if !(0..=180).contains(&p.init_pan) || !(0..=180).contains(&p.init_tilt) {
            return Err(SentinelError::config("initial pan/tilt must be within 0..=180"));
        }
        if p.pan_dir.abs() != 1 || p.tilt_dir.abs() != 1 {
            return Err(SentinelError::config("pan_dir/tilt_dir must be +1 or -1"));
        }
        if !(0.0..=1.0).contains(&p.smooth_alpha) {
            return Err(SentinelError::config("smooth_alpha must be within 0..=1"));
        }
        if p.max_step_deg < 0.0 || p.min_step_deg < 0.0 {
            return Err(SentinelError::config("step limits must not be negative"));
        }
        if self.worker.stationary_px <= 0.0 || self.worker.stationary_s < 0.0 {
            return Err(SentinelError::config("stationary thresholds must be positive"));
        }
        if self.topics.passive_signal == self.topics.validation_signal {
            return Err(SentinelError::config("the two signal topics must differ"));
        }
        Ok(())
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前配置:");
        info!("  MQTT: {}:{}", self.mqtt.host, self.mqtt.port);
        info!(
            "  信号主题: {} (超时 {:.1}s) + {} (超时 {:.1}s)",
            self.topics.passive_signal,
            self.gate.passive_timeout_s,
            self.topics.validation_signal,
            self.gate.validation_timeout_s
        );
        info!(
            "  门控策略: {:?} | 防抖 {:.1}s | 丢失即关闭: {}",
            self.gate.policy, self.gate.debounce_s, self.gate.close_on_person_lost
        );
        info!(
            "  云台: 初始({}, {}) | 死区 {:.0}px | 最大步长 {:.2}° | 平滑 {:.2}",
            self.ptz.init_pan,
            self.ptz.init_tilt,
            self.ptz.deadzone_px,
            self.ptz.max_step_deg,
            self.ptz.smooth_alpha
        );
        info!(
            "  静止判定: {:.0}px / {:.1}s",
            self.worker.stationary_px, self.worker.stationary_s
        );
        info!("  视频源: {}", self.source.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        let config = SentinelConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.gate.debounce_s, 3.0);
        assert_eq!(config.ptz.init_pan, 120);

        let reloaded = SentinelConfig::load(&path).unwrap();
        assert_eq!(reloaded.topics.actuator, "ptz/command");
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "gate": { "policy": "explicit_trigger", "debounce_s": 1.5 } }"#)
            .unwrap();
        let config = SentinelConfig::load(&path).unwrap();
        assert_eq!(config.gate.policy, GatePolicy::ExplicitTrigger);
        assert_eq!(config.gate.debounce_s, 1.5);
        assert_eq!(config.gate.passive_timeout_s, 5.0);
        assert_eq!(config.worker.stationary_px, 5.0);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SentinelConfig::load(&path),
            Err(SentinelError::Json(_))
        ));
    }

    #[test]
    fn invalid_direction_is_rejected() {
        let mut config = SentinelConfig::default();
        config.ptz.pan_dir = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let mut config = SentinelConfig::default();
        config.gate.debounce_s = 1e300;
        assert!(matches!(config.validate(), Err(SentinelError::Config(_))));

        let mut config = SentinelConfig::default();
        config.ptz.min_send_interval_s = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = SentinelConfig::default();
        config.worker.stationary_s = 86_400.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn args_override_file_values() {
        let args = Args::parse_from(["sentinel", "-s", "rtsp://cam/1", "-b", "10.0.0.2", "-p", "1884"]);
        let mut config = SentinelConfig::default();
        config.apply_args(&args);
        assert_eq!(config.source.url, "rtsp://cam/1");
        assert_eq!(config.mqtt.host, "10.0.0.2");
        assert_eq!(config.mqtt.port, 1884);
    }
}
