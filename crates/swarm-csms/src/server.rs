//! WebSocket endpoint for station sessions.
//!
//! Stations dial `ws://host:port/ocpp/{stationId}` with the `ocpp1.6`
//! subprotocol. Each accepted upgrade runs a session agent; a duplicate
//! station id is refused before the upgrade unless replacement is enabled.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{CsmsError, CsmsResult};
use crate::registry::CsmsState;
use crate::session::run_session;
use crate::CsmsConfig;

/// Longest station id accepted in the upgrade path.
const MAX_STATION_ID_LEN: usize = 48;

/// The CSMS server. Owns the shared state; the control plane keeps a clone
/// of the state handle for CSMS-originated operations.
pub struct CsmsServer {
    state: Arc<CsmsState>,
}

impl CsmsServer {
    pub fn new(config: CsmsConfig) -> CsmsResult<Self> {
        config.validate()?;
        Ok(Self {
            state: Arc::new(CsmsState::new(config)),
        })
    }

    pub fn state(&self) -> Arc<CsmsState> {
        self.state.clone()
    }

    /// Serve forever on the configured address.
    pub async fn run(self) -> CsmsResult<()> {
        let addr = format!(
            "{}:{}",
            self.state.config.bind_address, self.state.config.port
        );
        let listener = TcpListener::bind(&addr).await?;
        info!("CSMS listening on ws://{addr}/ocpp/<station_id>");
        serve(listener, self.state).await
    }
}

/// Bind (port 0 picks a free one) and serve in a background task. Returns
/// the bound address, the shared state and the server task handle.
pub async fn spawn_server(
    config: CsmsConfig,
) -> CsmsResult<(SocketAddr, Arc<CsmsState>, JoinHandle<CsmsResult<()>>)> {
    config.validate()?;
    let state = Arc::new(CsmsState::new(config));
    let addr = format!("{}:{}", state.config.bind_address, state.config.port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    info!("CSMS listening on ws://{local_addr}/ocpp/<station_id>");
    let serve_state = state.clone();
    let task = tokio::spawn(async move { serve(listener, serve_state).await });
    Ok((local_addr, state, task))
}

async fn serve(listener: TcpListener, state: Arc<CsmsState>) -> CsmsResult<()> {
    let app = Router::new()
        .route("/ocpp/:station_id", get(ws_handler))
        .with_state(state);
    axum::serve(listener, app)
        .await
        .map_err(|e| CsmsError::Server {
            message: e.to_string(),
        })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<CsmsState>>,
    Path(station_id): Path<String>,
) -> Response {
    if station_id.is_empty() || station_id.len() > MAX_STATION_ID_LEN {
        return (StatusCode::BAD_REQUEST, "invalid station id").into_response();
    }

    if state.is_connected(&station_id) && !state.config.replace_existing {
        warn!("{station_id}: refusing duplicate connection");
        return (StatusCode::CONFLICT, "station already connected").into_response();
    }

    ws.protocols(["ocpp1.6"])
        .on_upgrade(move |socket| run_session(socket, state, station_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_binds_an_ephemeral_port() {
        let config = CsmsConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let (addr, state, task) = spawn_server(config).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(state.session_count(), 0);
        task.abort();
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = CsmsConfig {
            heartbeat_interval: -5,
            ..Default::default()
        };
        assert!(CsmsServer::new(config).is_err());
    }
}
