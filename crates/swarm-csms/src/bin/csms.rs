//! Standalone CSMS server.
//!
//! Runs only the operator-side backend; stations (or the full simulator
//! binary) connect to it over `/ocpp/{stationId}`.

use anyhow::Context;
use swarm_csms::{CsmsConfig, CsmsServer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config file {path}"))?
        }
        None => CsmsConfig::default(),
    };

    info!("starting CSMS (heartbeat interval {}s)", config.heartbeat_interval);
    let server = CsmsServer::new(config).context("building CSMS server")?;
    server.run().await.context("running CSMS server")?;
    Ok(())
}
