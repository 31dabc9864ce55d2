//! # swarm-types
//!
//! Foundational types shared by every crate in the swarm simulator: the OCPP-J
//! message envelope, the error taxonomy, and the OCPP 1.6 value types that
//! appear inside payloads (statuses, meter values, charging profiles).

pub mod envelope;
pub mod error;
pub mod v16j;

pub use envelope::*;
pub use error::*;

pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use uuid::Uuid;

/// Message type identifier of an OCPP-J frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = OcppError;

    fn try_from(value: u8) -> Result<Self, OcppError> {
        match value {
            2 => Ok(MessageType::Call),
            3 => Ok(MessageType::CallResult),
            4 => Ok(MessageType::CallError),
            _ => Err(OcppError::ProtocolViolation {
                message: format!("invalid message type id: {value}"),
            }),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(msg_type: MessageType) -> Self {
        msg_type as u8
    }
}

/// RFID/token identifier presented at a connector.
pub type IdToken = String;

/// Connector identifier. Connector `0` addresses the whole station, which is
/// how OCPP scopes ChargePointMaxProfile and ClearChargingProfile filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectorId(pub u32);

impl ConnectorId {
    pub const STATION: ConnectorId = ConnectorId(0);

    pub fn new(id: u32) -> Self {
        ConnectorId(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn is_station_wide(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction identifier allocated by the CSMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub i32);

impl TransactionId {
    pub fn new(id: i32) -> Self {
        TransactionId(id)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
