//! 存在信号融合门控
//! Fusion of the two presence signals into the pipeline on/off gate

pub mod gate;
pub mod service;

pub use gate::{EventFusionGate, FusionState, GateEdge, SignalId, SignalState};
pub use service::{GateInput, GateService};
