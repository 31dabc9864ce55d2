//! # swarm-messages
//!
//! Typed request/response payloads for every OCPP 1.6J action the simulator
//! implements, plus the codec that moves them on and off the wire.

pub mod codec;
pub mod v16j;

pub use codec::{decode, encode};
pub use swarm_types::{Call, CallError, CallResult, Frame, Message, MessageType};

use swarm_types::{OcppError, OcppResult};

pub use serde::{Deserialize, Serialize};

/// An OCPP action payload. `ACTION_NAME` is the wire spelling; `Response`
/// ties a request to its confirmation type so call sites stay typed.
pub trait OcppAction: Serialize + for<'de> Deserialize<'de> + Send + Sync {
    const ACTION_NAME: &'static str;
    type Response: Serialize + for<'de> Deserialize<'de> + Send + Sync;
}

/// Build a CALL message for a typed action.
pub fn call<T: OcppAction>(action: T) -> OcppResult<Message> {
    Message::call(T::ACTION_NAME, action)
}

/// Build the CALLRESULT answering `unique_id` with a typed confirmation.
pub fn call_result<T: Serialize>(unique_id: String, response: T) -> OcppResult<Message> {
    Message::call_result(unique_id, response)
}

/// Decode a CALL's payload, checking the action name first.
pub fn extract_payload<T: OcppAction>(call: &Call) -> OcppResult<T> {
    if call.action != T::ACTION_NAME {
        return Err(OcppError::ProtocolViolation {
            message: format!(
                "expected action '{}', got '{}'",
                T::ACTION_NAME,
                call.action
            ),
        });
    }
    call.payload_as()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v16j::{AuthorizeRequest, HeartbeatRequest};

    #[test]
    fn call_carries_action_name() {
        let msg = call(AuthorizeRequest {
            id_tag: "TAG001".to_string(),
        })
        .unwrap();
        match &msg {
            Message::Call(c) => {
                assert_eq!(c.action, "Authorize");
                assert!(!c.unique_id.is_empty());
            }
            _ => panic!("expected Call"),
        }
    }

    #[test]
    fn extract_payload_checks_action() {
        let msg = call(HeartbeatRequest {}).unwrap();
        if let Message::Call(c) = msg {
            let err = extract_payload::<AuthorizeRequest>(&c).unwrap_err();
            assert!(err.to_string().contains("expected action 'Authorize'"));
        }
    }
}
