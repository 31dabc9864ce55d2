//! Station agent errors.

use thiserror::Error;

/// Failures surfaced by the agent's public contract. Transport problems and
/// call timeouts inside a running agent recover locally and never appear
/// here.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent is already running")]
    AlreadyRunning,

    #[error("agent is not running")]
    NotRunning,

    #[error("invalid preset: {message}")]
    InvalidPreset { message: String },

    #[error("stop timed out; agent aborted")]
    StopTimeout,

    #[error(transparent)]
    Ocpp(#[from] swarm_types::OcppError),
}
