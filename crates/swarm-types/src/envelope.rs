//! OCPP-J message envelope.
//!
//! The wire form is a JSON array in one of three shapes:
//!
//! ```text
//! [2, "<MessageId>", "<Action>", <Payload>]                      CALL
//! [3, "<MessageId>", <Payload>]                                  CALLRESULT
//! [4, "<MessageId>", "<ErrorCode>", "<Description>", <Details>]  CALLERROR
//! ```
//!
//! [`Frame`] is the raw array shape (serde tuple variants serialize as JSON
//! arrays); [`Message`] is the typed form the rest of the code works with.

use crate::{CallErrorCode, MessageType, OcppError, OcppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Raw OCPP-J frame as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    /// `[2, unique_id, action, payload]`
    Call(u8, String, String, Value),
    /// `[3, unique_id, payload]`
    CallResult(u8, String, Value),
    /// `[4, unique_id, error_code, error_description, error_details]`
    CallError(u8, String, String, String, Value),
}

/// Typed OCPP-J message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

/// A request frame awaiting a CALLRESULT or CALLERROR.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub unique_id: String,
    pub action: String,
    pub payload: Value,
}

/// A successful reply frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub unique_id: String,
    pub payload: Value,
}

/// An error reply frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub unique_id: String,
    pub error_code: CallErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl Message {
    /// Build a CALL with a fresh message id.
    pub fn call<T: Serialize>(action: &str, payload: T) -> OcppResult<Self> {
        Ok(Message::Call(Call {
            unique_id: Uuid::new_v4().to_string(),
            action: action.to_string(),
            payload: serde_json::to_value(payload)?,
        }))
    }

    /// Build the CALLRESULT answering `unique_id`.
    pub fn call_result<T: Serialize>(unique_id: String, payload: T) -> OcppResult<Self> {
        Ok(Message::CallResult(CallResult {
            unique_id,
            payload: serde_json::to_value(payload)?,
        }))
    }

    /// Build the CALLERROR answering `unique_id`.
    pub fn call_error(
        unique_id: String,
        error_code: CallErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Message::CallError(CallError {
            unique_id,
            error_code,
            error_description: error_description.into(),
            error_details: Value::Object(Default::default()),
        })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Call(_) => MessageType::Call,
            Message::CallResult(_) => MessageType::CallResult,
            Message::CallError(_) => MessageType::CallError,
        }
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Message::Call(m) => &m.unique_id,
            Message::CallResult(m) => &m.unique_id,
            Message::CallError(m) => &m.unique_id,
        }
    }
}

impl Call {
    /// Decode the payload into an action struct.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> OcppResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

impl CallResult {
    /// Decode the payload into a response struct.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> OcppResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

impl Frame {
    /// Promote a raw frame to a typed message, checking the type id.
    pub fn into_message(self) -> OcppResult<Message> {
        match self {
            Frame::Call(msg_type, unique_id, action, payload) => {
                if msg_type != 2 {
                    return Err(OcppError::ProtocolViolation {
                        message: format!("CALL frame with type id {msg_type}"),
                    });
                }
                Ok(Message::Call(Call {
                    unique_id,
                    action,
                    payload,
                }))
            }
            Frame::CallResult(msg_type, unique_id, payload) => {
                if msg_type != 3 {
                    return Err(OcppError::ProtocolViolation {
                        message: format!("CALLRESULT frame with type id {msg_type}"),
                    });
                }
                Ok(Message::CallResult(CallResult { unique_id, payload }))
            }
            Frame::CallError(msg_type, unique_id, code, description, details) => {
                if msg_type != 4 {
                    return Err(OcppError::ProtocolViolation {
                        message: format!("CALLERROR frame with type id {msg_type}"),
                    });
                }
                let error_code =
                    CallErrorCode::parse(&code).ok_or_else(|| OcppError::ProtocolViolation {
                        message: format!("unknown error code: {code}"),
                    })?;
                Ok(Message::CallError(CallError {
                    unique_id,
                    error_code,
                    error_description: description,
                    error_details: details,
                }))
            }
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Call(m) => Frame::Call(2, m.unique_id, m.action, m.payload),
            Message::CallResult(m) => Frame::CallResult(3, m.unique_id, m.payload),
            Message::CallError(m) => Frame::CallError(
                4,
                m.unique_id,
                m.error_code.as_str().to_string(),
                m.error_description,
                m.error_details,
            ),
        }
    }
}
