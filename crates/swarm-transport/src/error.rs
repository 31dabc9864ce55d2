//! Transport layer errors.

use thiserror::Error;

/// Failures at the socket layer. All of these are recoverable from the
/// station's point of view via reconnect.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connect failed: {message}")]
    Connect { message: String },

    #[error("handshake failed: {message}")]
    Handshake { message: String },

    #[error("connect timed out after {timeout_secs}s")]
    ConnectTimeout { timeout_secs: u64 },

    #[error("connection closed: {reason}")]
    Closed { reason: String },

    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("io error: {message}")]
    Io { message: String },

    #[error("tls error: {message}")]
    Tls { message: String },

    #[error("invalid endpoint url: {message}")]
    InvalidUrl { message: String },
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io {
            message: err.to_string(),
        }
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed => TransportError::Closed {
                reason: "connection closed".to_string(),
            },
            tungstenite::Error::AlreadyClosed => TransportError::Closed {
                reason: "already closed".to_string(),
            },
            tungstenite::Error::Protocol(msg) => TransportError::Handshake {
                message: msg.to_string(),
            },
            tungstenite::Error::Io(io_err) => TransportError::Io {
                message: io_err.to_string(),
            },
            tungstenite::Error::Tls(tls_err) => TransportError::Tls {
                message: tls_err.to_string(),
            },
            other => TransportError::Connect {
                message: other.to_string(),
            },
        }
    }
}

impl From<TransportError> for swarm_types::OcppError {
    fn from(err: TransportError) -> Self {
        swarm_types::OcppError::Transport {
            message: err.to_string(),
        }
    }
}

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
