//! MQTT 消息层
//! Broker connection and the publish boundary used by the control plane

pub mod link;
pub mod sink;

pub use link::{MessageHandler, MqttLink};
pub use sink::{MemorySink, MessageSink};
