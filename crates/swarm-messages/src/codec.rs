//! Wire codec: UTF-8 JSON text ↔ typed [`Message`].
//!
//! Decoding validates the array structure before promoting to the typed form
//! so a malformed frame is reported as a protocol violation, never as a
//! generic JSON error.

use serde_json::Value;
use swarm_types::{Frame, Message, OcppError, OcppResult};

/// Largest frame either side will accept, in bytes.
pub const MAX_FRAME_BYTES: usize = 65536;

/// Encode a message to its wire text.
pub fn encode(message: &Message) -> OcppResult<String> {
    let frame: Frame = message.clone().into();
    let text = serde_json::to_string(&frame)?;
    if text.len() > MAX_FRAME_BYTES {
        return Err(OcppError::Validation {
            message: format!(
                "frame of {} bytes exceeds limit of {} bytes",
                text.len(),
                MAX_FRAME_BYTES
            ),
        });
    }
    Ok(text)
}

/// Decode wire text into a typed message.
pub fn decode(text: &str) -> OcppResult<Message> {
    if text.len() > MAX_FRAME_BYTES {
        return Err(OcppError::ProtocolViolation {
            message: format!(
                "frame of {} bytes exceeds limit of {} bytes",
                text.len(),
                MAX_FRAME_BYTES
            ),
        });
    }

    let value: Value = serde_json::from_str(text).map_err(|e| OcppError::ProtocolViolation {
        message: format!("frame is not valid JSON: {e}"),
    })?;
    check_structure(&value)?;

    let frame: Frame = serde_json::from_value(value).map_err(|e| OcppError::ProtocolViolation {
        message: format!("frame does not match any envelope shape: {e}"),
    })?;
    frame.into_message()
}

/// Structural validation of the envelope array.
fn check_structure(value: &Value) -> OcppResult<()> {
    let array = value.as_array().ok_or_else(|| OcppError::ProtocolViolation {
        message: "frame must be a JSON array".to_string(),
    })?;

    if array.len() < 3 {
        return Err(OcppError::ProtocolViolation {
            message: "frame array must have at least 3 elements".to_string(),
        });
    }

    let msg_type = array[0].as_u64().ok_or_else(|| OcppError::ProtocolViolation {
        message: "first element must be the numeric message type".to_string(),
    })?;

    if !array[1].is_string() {
        return Err(OcppError::ProtocolViolation {
            message: "second element must be the message id string".to_string(),
        });
    }

    match msg_type {
        2 => {
            if array.len() != 4 || !array[2].is_string() || !array[3].is_object() {
                return Err(OcppError::ProtocolViolation {
                    message: "CALL must be [2, id, action, payload]".to_string(),
                });
            }
        }
        3 => {
            if array.len() != 3 || !array[2].is_object() {
                return Err(OcppError::ProtocolViolation {
                    message: "CALLRESULT must be [3, id, payload]".to_string(),
                });
            }
        }
        4 => {
            if array.len() != 5
                || !array[2].is_string()
                || !array[3].is_string()
                || !array[4].is_object()
            {
                return Err(OcppError::ProtocolViolation {
                    message: "CALLERROR must be [4, id, code, description, details]".to_string(),
                });
            }
        }
        other => {
            return Err(OcppError::ProtocolViolation {
                message: format!("invalid message type id: {other}"),
            });
        }
    }

    Ok(())
}

/// One-line frame summary for logs.
pub fn summarize(message: &Message) -> String {
    match message {
        Message::Call(c) => format!("CALL [{}] {}", c.unique_id, c.action),
        Message::CallResult(r) => format!("CALLRESULT [{}]", r.unique_id),
        Message::CallError(e) => format!(
            "CALLERROR [{}] {}: {}",
            e.unique_id, e.error_code, e.error_description
        ),
    }
}
