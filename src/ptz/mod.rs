//! 云台控制模块
//! Pan/tilt closed-loop controller and the per-axis command publisher

pub mod controller;
pub mod publisher;

pub use controller::PtzController;
pub use publisher::{command_payload, ActuatorPublisher, Axis};
