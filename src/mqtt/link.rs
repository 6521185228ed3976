//! MQTT 连接 (rumqttc 同步客户端)
//!
//! 一个连接对应一个网络事件线程. 断线后暂停 `reconnect_delay_ms` 再由事件循环
//! 自动重连; 每次 ConnAck 都重新订阅, 并调用已注册的连接钩子.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use tracing::{debug, error, info, warn};

use super::sink::MessageSink;
use crate::config::MqttConfig;
use crate::error::{SentinelError, SentinelResult, SinkError};
use crate::utils::{join_with_timeout, lock};

/// 入站消息回调 (topic, payload), 在网络线程上执行
pub type MessageHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

type ConnectHook = Box<dyn Fn() + Send + Sync>;

struct LinkShared {
    client: Client,
    connected: AtomicBool,
    stop: AtomicBool,
    subscriptions: Vec<String>,
    handler: Mutex<Option<MessageHandler>>,
    hooks: Mutex<Vec<ConnectHook>>,
}

/// MQTT 连接
pub struct MqttLink {
    shared: Arc<LinkShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

impl MqttLink {
    /// 建立连接并启动网络线程. 订阅列表在每次 (重新) 连接时生效.
    pub fn connect(config: &MqttConfig, subscriptions: Vec<String>) -> SentinelResult<Self> {
        if config.host.is_empty() {
            return Err(SentinelError::Mqtt("broker host is empty".into()));
        }
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_clean_session(true);

        let (client, connection) = Client::new(options, 64);
        let shared = Arc::new(LinkShared {
            client,
            connected: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            subscriptions,
            handler: Mutex::new(None),
            hooks: Mutex::new(Vec::new()),
        });

        let name = format!("{}:{}", config.host, config.port);
        let reconnect_delay = Duration::from_millis(config.reconnect_delay_ms);
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("mqtt-link".into())
            .spawn(move || network_loop(thread_shared, connection, reconnect_delay))?;

        info!("🔌 MQTT 连接启动: {}", name);
        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
            name,
        })
    }

    /// 设置入站消息回调; 设置之前到达的消息被丢弃
    pub fn set_handler(&self, handler: MessageHandler) {
        *lock(&self.shared.handler) = Some(handler);
    }

    /// 每次连接成功 (含重连) 后调用
    pub fn add_connect_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        lock(&self.shared.hooks).push(Box::new(hook));
    }

    /// 等待首次连接, 超时返回 false
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.is_connected() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        self.is_connected()
    }

    /// 断开并等待网络线程退出 (有界等待)
    pub fn shutdown(&self, timeout: Duration) {
        if self.shared.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shared.client.try_disconnect();
        self.shared.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.handle).take() {
            if !join_with_timeout(handle, timeout) {
                warn!("⚠️ MQTT 网络线程未在 {:?} 内退出, 已分离", timeout);
            }
        }
        info!("🔌 MQTT 连接已关闭: {}", self.name);
    }
}

impl MessageSink for MqttLink {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::Disconnected);
        }
        self.shared
            .client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| SinkError::Rejected(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let _ = self.shared.client.try_disconnect();
    }
}

fn network_loop(shared: Arc<LinkShared>, mut connection: Connection, reconnect_delay: Duration) {
    for notification in connection.iter() {
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                shared.connected.store(true, Ordering::SeqCst);
                info!("✅ MQTT 已连接");
                for topic in &shared.subscriptions {
                    match shared.client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        Ok(()) => debug!("📥 订阅 {}", topic),
                        Err(e) => error!("❌ 订阅 {} 失败: {}", topic, e),
                    }
                }
                for hook in lock(&shared.hooks).iter() {
                    hook();
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload);
                debug!("📨 {} ← {}", publish.topic, payload);
                let handler = lock(&shared.handler).clone();
                if let Some(handler) = handler {
                    handler(&publish.topic, &payload);
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                shared.connected.store(false, Ordering::SeqCst);
                warn!("⚠️ broker 主动断开");
            }
            Ok(_) => {}
            Err(e) => {
                if shared.connected.swap(false, Ordering::SeqCst) {
                    warn!("⚠️ MQTT 连接中断: {}", e);
                } else {
                    debug!("MQTT 连接失败: {}", e);
                }
                // 重连前暂停, 期间仍响应停止标志
                let deadline = Instant::now() + reconnect_delay;
                while Instant::now() < deadline && !shared.stop.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(50));
                }
                if shared.stop.load(Ordering::SeqCst) {
                    break;
                }
            }
        }
    }
    shared.connected.store(false, Ordering::SeqCst);
    debug!("MQTT 网络线程退出");
}
