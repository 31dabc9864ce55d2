//! # swarm-station
//!
//! The charge-point side of the simulator: one [`StationAgent`] per virtual
//! station, each owning a WebSocket session to the CSMS and driving the full
//! OCPP 1.6J lifecycle: boot, heartbeat, authorization, transactions,
//! metering under smart-charging limits, reconnect with backoff.

pub mod agent;
pub mod error;
pub mod handlers;
pub mod logbuf;
pub mod preset;

pub use agent::{AgentConfig, StationAgent, StationSnapshot};
pub use error::AgentError;
pub use logbuf::{LogBuffer, LOG_CAPACITY};
pub use preset::{builtin_presets, BehaviorPreset};
