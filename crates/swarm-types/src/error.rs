//! Error taxonomy for the simulator core.
//!
//! The variants mirror the failure classes that cross component boundaries:
//! transport failures recover locally via reconnect, call timeouts and
//! CALLERRORs resolve the pending call that caused them, validation failures
//! are surfaced to the caller before any state change.

use thiserror::Error;

/// Protocol- and application-level errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OcppError {
    /// Socket open/read/write failure. Recoverable via reconnect.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// No reply for an outgoing CALL within its deadline.
    #[error("call timed out: {action}")]
    CallTimeout { action: String },

    /// Peer answered with a CALLERROR frame.
    #[error("call error {code}: {description}")]
    CallError {
        code: CallErrorCode,
        description: String,
    },

    /// Malformed envelope, unknown action, duplicate reply.
    #[error("protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// Peer accepted the frame but refused the request.
    #[error("rejected: {reason}")]
    Rejected { reason: String },

    /// CSMS-originated call issued while the station has no session.
    #[error("station not connected: {station_id}")]
    StationDisconnected { station_id: String },

    /// A local stop interrupted an in-flight operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Structural validation failed; no state was changed.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// JSON (de)serialization failure.
    #[error("json error: {message}")]
    Json { message: String },
}

impl From<serde_json::Error> for OcppError {
    fn from(err: serde_json::Error) -> Self {
        OcppError::Json {
            message: err.to_string(),
        }
    }
}

/// CALLERROR codes defined by OCPP-J.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CallErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurrenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl CallErrorCode {
    /// Spelling used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallErrorCode::NotImplemented => "NotImplemented",
            CallErrorCode::NotSupported => "NotSupported",
            CallErrorCode::InternalError => "InternalError",
            CallErrorCode::ProtocolError => "ProtocolError",
            CallErrorCode::SecurityError => "SecurityError",
            CallErrorCode::FormationViolation => "FormationViolation",
            CallErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            CallErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            CallErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            CallErrorCode::GenericError => "GenericError",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "NotImplemented" => CallErrorCode::NotImplemented,
            "NotSupported" => CallErrorCode::NotSupported,
            "InternalError" => CallErrorCode::InternalError,
            "ProtocolError" => CallErrorCode::ProtocolError,
            "SecurityError" => CallErrorCode::SecurityError,
            "FormationViolation" => CallErrorCode::FormationViolation,
            "PropertyConstraintViolation" => CallErrorCode::PropertyConstraintViolation,
            "OccurrenceConstraintViolation" => CallErrorCode::OccurrenceConstraintViolation,
            "TypeConstraintViolation" => CallErrorCode::TypeConstraintViolation,
            "GenericError" => CallErrorCode::GenericError,
            _ => return None,
        })
    }
}

impl std::fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result alias used across the workspace.
pub type OcppResult<T> = Result<T, OcppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_error_code_round_trip() {
        for code in [
            CallErrorCode::NotImplemented,
            CallErrorCode::ProtocolError,
            CallErrorCode::GenericError,
        ] {
            assert_eq!(CallErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(CallErrorCode::parse("NoSuchCode"), None);
    }

    #[test]
    fn call_error_code_serialization() {
        let json = serde_json::to_string(&CallErrorCode::NotImplemented).unwrap();
        assert_eq!(json, "\"NotImplemented\"");
        let back: CallErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CallErrorCode::NotImplemented);
    }

    #[test]
    fn error_display() {
        let err = OcppError::CallTimeout {
            action: "BootNotification".to_string(),
        };
        assert_eq!(err.to_string(), "call timed out: BootNotification");

        let err = OcppError::StationDisconnected {
            station_id: "SWARM-0001".to_string(),
        };
        assert!(err.to_string().contains("SWARM-0001"));
    }

    #[test]
    fn json_error_conversion() {
        let json_err = serde_json::from_str::<i32>("not json").unwrap_err();
        match OcppError::from(json_err) {
            OcppError::Json { message } => assert!(!message.is_empty()),
            other => panic!("expected Json error, got {other:?}"),
        }
    }
}
