//! # swarm-csms
//!
//! The operator-side backend. Terminates station WebSocket sessions on
//! `/ocpp/{stationId}`, keeps a registry of connected charge points with
//! their transactions and connector statuses, and issues CSMS-originated
//! smart-charging calls (SetChargingProfile, GetCompositeSchedule,
//! ClearChargingProfile) into those sessions.

pub mod error;
pub mod registry;
pub mod server;
pub mod session;

pub use error::{CsmsError, CsmsResult};
pub use registry::{ConnectorStatusRecord, CsmsState, SessionHandle, TransactionRecord};
pub use server::{spawn_server, CsmsServer};

use serde::{Deserialize, Serialize};

/// CSMS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsmsConfig {
    /// Bind address for the OCPP WebSocket endpoint.
    pub bind_address: String,
    pub port: u16,
    /// Heartbeat interval handed to stations in BootNotification replies.
    pub heartbeat_interval: i32,
    /// Id tags refused at Authorize.
    pub blocked_id_tags: Vec<String>,
    /// Replace an existing session on a duplicate station id instead of
    /// refusing the upgrade.
    pub replace_existing: bool,
    /// Per-CALL deadline for CSMS-originated calls, seconds.
    pub call_timeout_secs: u64,
}

impl Default for CsmsConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9000,
            heartbeat_interval: 60,
            blocked_id_tags: Vec::new(),
            replace_existing: false,
            call_timeout_secs: 30,
        }
    }
}

impl CsmsConfig {
    pub fn validate(&self) -> CsmsResult<()> {
        if self.bind_address.is_empty() {
            return Err(CsmsError::Configuration {
                message: "bind_address must not be empty".to_string(),
            });
        }
        if self.heartbeat_interval <= 0 {
            return Err(CsmsError::Configuration {
                message: format!(
                    "heartbeat_interval must be positive, got {}",
                    self.heartbeat_interval
                ),
            });
        }
        if self.call_timeout_secs == 0 {
            return Err(CsmsError::Configuration {
                message: "call_timeout_secs must be positive".to_string(),
            });
        }
        Ok(())
    }
}
