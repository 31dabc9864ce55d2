//! # swarm-transport
//!
//! WebSocket plumbing shared by the station agent and the CSMS backend:
//! transport configuration, the station-side client link, and the
//! pending-call router that correlates outgoing CALLs with their replies.
//! Writes on a link are serialized through one writer task, so frames hit
//! the wire in the order they were submitted.

pub mod client;
pub mod error;
pub mod router;

pub use client::{connect, LinkCommand, LinkEvent, WsLink};
pub use error::{TransportError, TransportResult};
pub use router::{call_over, CallOutcome, CallRouter};

use std::time::Duration;

/// Subprotocol both ends negotiate.
pub const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Deadline for the WebSocket connect + handshake.
    pub connect_timeout: Duration,
    /// Default per-CALL reply deadline.
    pub call_timeout: Duration,
    /// Largest frame either side will accept.
    pub max_frame_bytes: usize,
    /// Outbound frame queue depth before senders back-pressure.
    pub outbox_depth: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
            max_frame_bytes: 65536,
            outbox_depth: 64,
        }
    }
}

/// Build the endpoint URL a station dials: `<base>/<station_id>`.
pub fn endpoint_url(base: &str, station_id: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), station_id)
}

/// Extract the station id from an `/ocpp/{stationId}` request path.
pub fn station_id_from_path(path: &str) -> Option<&str> {
    let mut parts = path.split('/').filter(|p| !p.is_empty());
    match (parts.next(), parts.next(), parts.next()) {
        (Some("ocpp"), Some(id), None) if !id.is_empty() => Some(id),
        _ => None,
    }
}
