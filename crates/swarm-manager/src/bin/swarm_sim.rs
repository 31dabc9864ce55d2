//! The full simulator: CSMS backend, station manager and control-plane API
//! in one process.
//!
//! Stations created through the control plane dial back into the embedded
//! CSMS over real WebSocket sessions, so every smart-charging command
//! travels the OCPP link end to end.

use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use swarm_csms::{spawn_server, CsmsConfig};
use swarm_manager::{api, ManagerConfig, StationManager};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimConfig {
    #[serde(default)]
    csms: CsmsConfig,
    #[serde(default)]
    manager: ManagerConfig,
    #[serde(default = "default_api_bind")]
    api_bind: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            csms: CsmsConfig::default(),
            manager: ManagerConfig::default(),
            api_bind: default_api_bind(),
        }
    }
}

fn default_api_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            serde_json::from_str::<SimConfig>(&text)
                .with_context(|| format!("parsing config file {path}"))?
        }
        None => SimConfig::default(),
    };

    // The embedded CSMS is dialed over loopback regardless of its bind
    // address; an explicit csms_base_url in the config wins.
    let (csms_addr, csms_state, csms_task) = spawn_server(config.csms.clone())
        .await
        .context("starting CSMS")?;
    if config.manager.csms_base_url == ManagerConfig::default().csms_base_url {
        config.manager.csms_base_url = format!("ws://127.0.0.1:{}/ocpp", csms_addr.port());
    }

    let manager = Arc::new(StationManager::new(config.manager.clone(), csms_state));

    let listener = TcpListener::bind(&config.api_bind)
        .await
        .with_context(|| format!("binding control API on {}", config.api_bind))?;
    info!("control API listening on http://{}", listener.local_addr()?);
    info!("stations dial {}", config.manager.csms_base_url);

    let app = api::router(manager.clone());
    let api_task = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    manager.shutdown().await;
    api_task.abort();
    csms_task.abort();
    Ok(())
}
