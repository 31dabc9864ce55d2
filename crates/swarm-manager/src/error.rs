//! Manager errors surfaced to the control plane.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("station not found: {station_id}")]
    NotFound { station_id: String },

    #[error("unknown profile preset: {name}")]
    UnknownPreset { name: String },

    #[error("invalid price: {price}")]
    InvalidPrice { price: f64 },

    #[error("invalid station count: {count} (max {max})")]
    InvalidCount { count: usize, max: usize },

    #[error(transparent)]
    Agent(#[from] swarm_station::AgentError),

    #[error(transparent)]
    Csms(#[from] swarm_csms::CsmsError),

    #[error(transparent)]
    Ocpp(#[from] swarm_types::OcppError),
}
