//! CSMS errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CsmsError {
    /// A CSMS-originated call was issued while no session exists for the
    /// station, or the session died before the reply arrived.
    #[error("station not connected: {station_id}")]
    StationDisconnected { station_id: String },

    /// An upgrade arrived for an already-connected station id while
    /// `replace_existing` is off.
    #[error("station already connected: {station_id}")]
    DuplicateSession { station_id: String },

    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    #[error("server error: {message}")]
    Server { message: String },

    #[error(transparent)]
    Ocpp(#[from] swarm_types::OcppError),
}

impl From<std::io::Error> for CsmsError {
    fn from(err: std::io::Error) -> Self {
        CsmsError::Server {
            message: err.to_string(),
        }
    }
}

/// Result alias for CSMS operations.
pub type CsmsResult<T> = Result<T, CsmsError>;
