//! The station agent.
//!
//! One agent per virtual station. A supervisor task owns the connection:
//! it dials the CSMS, runs a read loop, a lifecycle task and a heartbeat
//! task over the shared link, and reconnects with capped exponential
//! backoff when the link drops. `start`/`stop` are idempotent; `stop`
//! finishes an in-flight transaction (StopTransaction, reason HardReset)
//! before closing the socket with a clean close frame.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use swarm_charging::{
    evaluate, evaluate_meter_tick, ChargingContext, MeterAction, PolicyAction, PolicyEnv,
    PolicyStationState, ProfileManager,
};
use swarm_messages::v16j::*;
use swarm_messages::OcppAction;
use swarm_transport::{call_over, connect, CallRouter, LinkCommand, LinkEvent, TransportConfig};
use swarm_types::v16j::{
    ChargePointErrorCode, ChargePointStatus, MeterValue, Reason, SampledValue,
};
use swarm_types::{Message, OcppError, OcppResult};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::handlers::{InboundRouter, PostAction};
use crate::logbuf::LogBuffer;
use crate::preset::BehaviorPreset;

/// Single simulated connector per station.
pub(crate) const CONNECTOR_ID: u32 = 1;

const BOOT_RETRY_SECS: u64 = 10;
const POLICY_RETRY_SECS: u64 = 60;
const STOP_GRACE: Duration = Duration::from_secs(5);
const BACKOFF_CAP_SECS: u64 = 60;

/// f64 stored as bits in an AtomicU64. Readers are lock-free.
#[derive(Debug)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    pub(crate) fn add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self.0.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Transport-level session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ActiveTx {
    pub(crate) id: i32,
    pub(crate) started_at: DateTime<Utc>,
}

/// State shared between the agent handle and its tasks.
pub(crate) struct Shared {
    pub(crate) station_id: String,
    pub(crate) preset: BehaviorPreset,
    pub(crate) profiles: ProfileManager,
    pub(crate) logs: LogBuffer,
    pub(crate) router: CallRouter,
    pub(crate) price: AtomicF64,
    pub(crate) session_energy_wh: AtomicF64,
    pub(crate) lifetime_energy_wh: AtomicF64,
    pub(crate) earnings: AtomicF64,
    pub(crate) last_power_w: AtomicF64,
    pub(crate) running: AtomicBool,
    pub(crate) heartbeat_secs: AtomicU64,
    status: Mutex<ChargePointStatus>,
    transport: Mutex<TransportStatus>,
    current_tx: Mutex<Option<ActiveTx>>,
}

impl Shared {
    pub(crate) fn new(station_id: String, preset: BehaviorPreset, initial_price: f64) -> Self {
        let heartbeat = preset.heartbeat_interval;
        let shared = Self {
            station_id,
            preset,
            profiles: ProfileManager::new(),
            logs: LogBuffer::new(),
            router: CallRouter::new(),
            price: AtomicF64::new(initial_price),
            session_energy_wh: AtomicF64::new(0.0),
            lifetime_energy_wh: AtomicF64::new(0.0),
            earnings: AtomicF64::new(0.0),
            last_power_w: AtomicF64::new(0.0),
            running: AtomicBool::new(false),
            heartbeat_secs: AtomicU64::new(heartbeat),
            status: Mutex::new(ChargePointStatus::Available),
            transport: Mutex::new(TransportStatus::Closed),
            current_tx: Mutex::new(None),
        };
        shared.logs.push("Station initialized");
        shared
    }

    pub(crate) fn status(&self) -> ChargePointStatus {
        *self.status.lock().unwrap()
    }

    pub(crate) fn set_status(&self, status: ChargePointStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub(crate) fn transport_status(&self) -> TransportStatus {
        *self.transport.lock().unwrap()
    }

    pub(crate) fn set_transport_status(&self, status: TransportStatus) {
        *self.transport.lock().unwrap() = status;
    }

    pub(crate) fn current_transaction(&self) -> Option<ActiveTx> {
        *self.current_tx.lock().unwrap()
    }

    pub(crate) fn set_current_transaction(&self, tx: Option<ActiveTx>) {
        *self.current_tx.lock().unwrap() = tx;
    }

    /// Context for profile-manager reads, from the active transaction.
    pub(crate) fn charging_context(&self) -> ChargingContext {
        match self.current_transaction() {
            Some(tx) => ChargingContext {
                transaction_id: Some(tx.id),
                transaction_start: Some(tx.started_at),
            },
            None => ChargingContext::default(),
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub station_id: String,
    /// Base CSMS endpoint, e.g. `ws://127.0.0.1:9000/ocpp`.
    pub csms_base_url: String,
    pub preset: BehaviorPreset,
    pub transport: TransportConfig,
    pub vendor: String,
    pub model: String,
    pub firmware_version: String,
    pub initial_price: f64,
}

impl AgentConfig {
    pub fn new(station_id: impl Into<String>, csms_base_url: impl Into<String>, preset: BehaviorPreset) -> Self {
        Self {
            station_id: station_id.into(),
            csms_base_url: csms_base_url.into(),
            preset,
            transport: TransportConfig::default(),
            vendor: "SwarmSim".to_string(),
            model: "Virtual-CP".to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            initial_price: 20.0,
        }
    }
}

/// Point-in-time view of an agent, consumed by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub id: String,
    pub profile: String,
    pub running: bool,
    pub status: String,
    pub transport: TransportStatus,
    pub usage_kw: f64,
    pub energy_kwh: f64,
    pub energy_percent: f64,
    pub max_energy_kwh: f64,
    pub price_threshold: f64,
    pub allow_peak: bool,
    /// `"profile"` while an OCPP limit is active, `"policy"` otherwise.
    pub ocpp_control_mode: String,
    pub total_energy_kwh: f64,
    pub total_earnings: f64,
}

struct Runtime {
    supervisor: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// A virtual charge point.
pub struct StationAgent {
    config: AgentConfig,
    shared: Arc<Shared>,
    runtime: tokio::sync::Mutex<Option<Runtime>>,
}

impl StationAgent {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        config
            .preset
            .validate()
            .map_err(|e| AgentError::InvalidPreset {
                message: e.to_string(),
            })?;
        let shared = Arc::new(Shared::new(
            config.station_id.clone(),
            config.preset.clone(),
            config.initial_price,
        ));
        Ok(Self {
            config,
            shared,
            runtime: tokio::sync::Mutex::new(None),
        })
    }

    pub fn station_id(&self) -> &str {
        &self.shared.station_id
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Start the supervisor task. A no-op when already running.
    pub async fn start(&self) {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return;
        }
        info!("{}: starting", self.config.station_id);
        self.shared.logs.push("Station startup initiated");
        self.shared.running.store(true, Ordering::Release);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = tokio::spawn(supervisor(
            self.config.clone(),
            self.shared.clone(),
            shutdown_rx,
        ));
        *runtime = Some(Runtime {
            supervisor,
            shutdown: shutdown_tx,
        });
    }

    /// Stop the agent: finish any in-flight transaction, close the socket
    /// with a clean close frame, and wait up to five seconds for the
    /// handshake before aborting. A no-op when already stopped.
    pub async fn stop(&self) -> Result<(), AgentError> {
        let Some(runtime) = self.runtime.lock().await.take() else {
            return Ok(());
        };
        info!("{}: stopping", self.config.station_id);
        let _ = runtime.shutdown.send(true);

        let mut supervisor = runtime.supervisor;
        let result = tokio::time::timeout(STOP_GRACE, &mut supervisor).await;
        self.shared.running.store(false, Ordering::Release);
        self.shared.set_transport_status(TransportStatus::Closed);

        match result {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!("{}: stop grace period elapsed", self.config.station_id);
                supervisor.abort();
                Err(AgentError::StopTimeout)
            }
        }
    }

    /// Atomically publish a new electricity price to this agent.
    pub fn apply_price(&self, price: f64) {
        self.shared.price.store(price);
    }

    pub fn snapshot(&self) -> StationSnapshot {
        let shared = &self.shared;
        let preset = &shared.preset;
        let energy_wh = shared.session_energy_wh.load();
        let max_wh = preset.max_energy_wh();
        let limited = shared
            .profiles
            .current_limit(CONNECTOR_ID, &shared.charging_context(), Utc::now())
            .is_some();

        StationSnapshot {
            id: shared.station_id.clone(),
            profile: preset.name.clone(),
            running: self.is_running(),
            status: shared.status().to_string(),
            transport: shared.transport_status(),
            usage_kw: shared.last_power_w.load() / 1000.0,
            energy_kwh: energy_wh / 1000.0,
            energy_percent: if max_wh > 0.0 {
                (energy_wh / max_wh * 100.0).min(100.0)
            } else {
                0.0
            },
            max_energy_kwh: preset.max_energy_kwh,
            price_threshold: preset.charge_if_price_below,
            allow_peak: preset.allow_peak,
            ocpp_control_mode: if limited { "profile" } else { "policy" }.to_string(),
            total_energy_kwh: shared.lifetime_energy_wh.load() / 1000.0,
            total_earnings: shared.earnings.load(),
        }
    }

    pub fn logs(&self) -> Vec<String> {
        self.shared.logs.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Supervisor: connect, run, reconnect
// ---------------------------------------------------------------------------

enum ConnectionEnd {
    Stopped,
    LinkLost,
    Offline(Duration),
}

async fn supervisor(config: AgentConfig, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let endpoint = swarm_transport::endpoint_url(&config.csms_base_url, &config.station_id);
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        shared.set_transport_status(TransportStatus::Connecting);
        match connect(&endpoint, &config.transport).await {
            Ok(link) => {
                attempt = 0;
                shared.set_transport_status(TransportStatus::Open);
                let end = run_connection(&config, &shared, link, &mut shutdown).await;
                shared.set_transport_status(TransportStatus::Closed);
                shared.router.fail_all(|_| OcppError::Cancelled);
                shared.set_current_transaction(None);
                shared.last_power_w.store(0.0);

                match end {
                    ConnectionEnd::Stopped => break,
                    ConnectionEnd::Offline(duration) => {
                        shared
                            .logs
                            .push(format!("Offline window ({}s)", duration.as_secs()));
                        if sleep_or_shutdown(duration, &mut shutdown).await {
                            break;
                        }
                    }
                    ConnectionEnd::LinkLost => {
                        attempt += 1;
                        let delay = backoff_delay(attempt);
                        shared.logs.push(format!(
                            "Connection lost, reconnecting in {:.1}s",
                            delay.as_secs_f64()
                        ));
                        if sleep_or_shutdown(delay, &mut shutdown).await {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                attempt += 1;
                let delay = backoff_delay(attempt);
                debug!(
                    "{}: connect failed ({e}), retry in {:.1}s",
                    config.station_id,
                    delay.as_secs_f64()
                );
                shared.logs.push(format!(
                    "Connection failed, retrying in {:.1}s",
                    delay.as_secs_f64()
                ));
                if sleep_or_shutdown(delay, &mut shutdown).await {
                    break;
                }
            }
        }
    }

    shared.logs.push("Station shutting down");
    shared.running.store(false, Ordering::Release);
    info!("{}: supervisor exited", config.station_id);
}

/// Exponential backoff: 1, 2, 4, … seconds with ±20 % jitter, never above
/// the 60 s cap.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(6);
    let base = (1u64 << exp).min(BACKOFF_CAP_SECS) as f64;
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_secs_f64((base * jitter).min(BACKOFF_CAP_SECS as f64))
}

/// Cooperative sleep; true means shutdown was requested.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => true,
    }
}

async fn run_connection(
    config: &AgentConfig,
    shared: &Arc<Shared>,
    link: swarm_transport::WsLink,
    shutdown: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let (outbox, events, writer, reader) = link.into_parts();
    let (down_tx, down_rx) = watch::channel(false);

    let read_task = tokio::spawn(read_loop(
        shared.clone(),
        outbox.clone(),
        events,
        down_tx,
        config.transport.call_timeout,
    ));

    let end = lifecycle(config, shared, &outbox, shutdown, down_rx).await;

    // Clean close: code 1000 via the writer, then collect the tasks. A peer
    // that never completes the handshake gets aborted after the grace.
    shared.set_transport_status(TransportStatus::Closing);
    let _ = outbox.send(LinkCommand::Close).await;
    let mut tasks = [writer, reader, read_task];
    let join = async {
        for task in &mut tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(STOP_GRACE, join).await.is_err() {
        debug!("{}: close handshake timed out", config.station_id);
        for task in &tasks {
            task.abort();
        }
    }
    end
}

/// Pull frames off the socket, answer inbound CALLs, resolve replies.
async fn read_loop(
    shared: Arc<Shared>,
    outbox: mpsc::Sender<LinkCommand>,
    mut events: mpsc::Receiver<LinkEvent>,
    down: watch::Sender<bool>,
    call_timeout: Duration,
) {
    let inbound = InboundRouter::new(shared.clone(), outbox.clone(), call_timeout);

    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Text(text) => match swarm_messages::decode(&text) {
                Ok(Message::Call(call)) => {
                    let (reply, post) = inbound.handle(&call);
                    match swarm_messages::encode(&reply) {
                        Ok(frame) => {
                            if outbox.send(LinkCommand::Send(frame)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("{}: reply encode failed: {e}", shared.station_id),
                    }
                    if post == PostAction::CloseLink {
                        let _ = outbox.send(LinkCommand::Close).await;
                    }
                }
                Ok(Message::CallResult(result)) => {
                    if shared
                        .router
                        .resolve(&result.unique_id, result.payload)
                        .is_none()
                    {
                        warn!(
                            "{}: dropping unmatched CALLRESULT [{}]",
                            shared.station_id, result.unique_id
                        );
                    }
                }
                Ok(Message::CallError(error)) => {
                    if shared
                        .router
                        .reject(&error.unique_id, error.error_code, error.error_description)
                        .is_none()
                    {
                        warn!(
                            "{}: dropping unmatched CALLERROR [{}]",
                            shared.station_id, error.unique_id
                        );
                    }
                }
                Err(e) => {
                    // One malformed frame ends the session; the supervisor
                    // reconnects.
                    warn!("{}: malformed frame: {e}", shared.station_id);
                    shared.logs.push(format!("Malformed frame dropped: {e}"));
                    let _ = outbox.send(LinkCommand::Close).await;
                }
            },
            LinkEvent::Closed { reason } => {
                debug!("{}: link closed: {reason}", shared.station_id);
                break;
            }
        }
    }
    let _ = down.send(true);
}

// ---------------------------------------------------------------------------
// Lifecycle: boot → status → heartbeat ∥ session loop
// ---------------------------------------------------------------------------

async fn call_action<T: OcppAction>(
    shared: &Shared,
    outbox: &mpsc::Sender<LinkCommand>,
    timeout: Duration,
    payload: &T,
) -> OcppResult<T::Response> {
    let value = call_over(
        &shared.router,
        outbox,
        T::ACTION_NAME,
        serde_json::to_value(payload)?,
        timeout,
    )
    .await?;
    Ok(serde_json::from_value(value)?)
}

async fn send_status(
    shared: &Shared,
    outbox: &mpsc::Sender<LinkCommand>,
    timeout: Duration,
    status: ChargePointStatus,
) -> OcppResult<()> {
    shared.set_status(status);
    let request = StatusNotificationRequest {
        connector_id: CONNECTOR_ID,
        error_code: ChargePointErrorCode::NoError,
        status,
        timestamp: Some(Utc::now()),
        info: None,
    };
    call_action(shared, outbox, timeout, &request).await.map(|_: StatusNotificationResponse| ())
}

async fn lifecycle(
    config: &AgentConfig,
    shared: &Arc<Shared>,
    outbox: &mpsc::Sender<LinkCommand>,
    shutdown: &mut watch::Receiver<bool>,
    mut down: watch::Receiver<bool>,
) -> ConnectionEnd {
    let timeout = config.transport.call_timeout;

    // Boot, retrying until the CSMS accepts us.
    loop {
        if *shutdown.borrow() {
            return ConnectionEnd::Stopped;
        }
        if *down.borrow() {
            return ConnectionEnd::LinkLost;
        }

        shared.logs.push("BootNotification sent");
        let request = BootNotificationRequest {
            charge_point_vendor: config.vendor.clone(),
            charge_point_model: config.model.clone(),
            firmware_version: Some(config.firmware_version.clone()),
            charge_point_serial_number: Some(config.station_id.clone()),
        };
        match call_action::<BootNotificationRequest>(shared, outbox, timeout, &request).await {
            Ok(response) => match response.status {
                RegistrationStatus::Accepted => {
                    if response.interval > 0 {
                        shared
                            .heartbeat_secs
                            .store(response.interval as u64, Ordering::Release);
                    }
                    shared.logs.push("BootNotification accepted");
                    break;
                }
                status => {
                    shared
                        .logs
                        .push(format!("BootNotification rejected: {status:?}"));
                    if sleep_or_shutdown(Duration::from_secs(BOOT_RETRY_SECS), shutdown).await {
                        return ConnectionEnd::Stopped;
                    }
                }
            },
            Err(OcppError::CallTimeout { .. }) => {
                shared.logs.push("BootNotification timed out, retrying");
            }
            Err(OcppError::Cancelled) => return ConnectionEnd::Stopped,
            Err(e) => {
                debug!("{}: boot failed: {e}", config.station_id);
                return ConnectionEnd::LinkLost;
            }
        }
    }

    if send_status(shared, outbox, timeout, ChargePointStatus::Available)
        .await
        .is_err()
    {
        return ConnectionEnd::LinkLost;
    }
    shared.logs.push("Connector available");

    let heartbeat = tokio::spawn(heartbeat_loop(
        shared.clone(),
        outbox.clone(),
        timeout,
        shutdown.clone(),
    ));

    let end = session_loop(config, shared, outbox, shutdown, &mut down).await;
    heartbeat.abort();
    end
}

async fn heartbeat_loop(
    shared: Arc<Shared>,
    outbox: mpsc::Sender<LinkCommand>,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let interval = shared.heartbeat_secs.load(Ordering::Acquire).max(1);
        if sleep_or_shutdown(Duration::from_secs(interval), &mut shutdown).await {
            return;
        }
        match call_action::<HeartbeatRequest>(&shared, &outbox, timeout, &HeartbeatRequest {}).await
        {
            Ok(_) => shared.logs.push("Heartbeat sent"),
            Err(OcppError::CallTimeout { .. }) => {
                debug!("{}: heartbeat timed out", shared.station_id);
            }
            Err(_) => return,
        }
    }
}

#[derive(Clone, Copy)]
enum MeterExit {
    CapReached,
    PolicyStop,
    Shutdown,
    LinkDown,
}

async fn session_loop(
    config: &AgentConfig,
    shared: &Arc<Shared>,
    outbox: &mpsc::Sender<LinkCommand>,
    shutdown: &mut watch::Receiver<bool>,
    down: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let preset = &config.preset;
    let timeout = config.transport.call_timeout;

    if !preset.enable_transactions {
        debug!("{}: transactions disabled by preset", config.station_id);
        // Stay connected for heartbeats until stopped or dropped.
        loop {
            if *shutdown.borrow() {
                return ConnectionEnd::Stopped;
            }
            if *down.borrow() {
                return ConnectionEnd::LinkLost;
            }
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = down.changed() => {}
            }
        }
    }

    loop {
        if *shutdown.borrow() {
            return ConnectionEnd::Stopped;
        }
        if *down.borrow() {
            return ConnectionEnd::LinkLost;
        }

        // Idle between sessions.
        let idle = rand::thread_rng().gen_range(preset.idle_min..=preset.idle_max);
        if sleep_or_shutdown(Duration::from_secs(idle), shutdown).await {
            return ConnectionEnd::Stopped;
        }
        if *down.borrow() {
            return ConnectionEnd::LinkLost;
        }

        // Policy gate before any OCPP traffic.
        let decision = evaluate(
            &PolicyStationState::fresh(),
            &preset.policy_profile(),
            &PolicyEnv {
                current_price: shared.price.load(),
                hour: Utc::now().hour() as u8,
            },
        );
        if decision.action != PolicyAction::Charge {
            shared.logs.push(format!("{} — waiting", decision.reason));
            if sleep_or_shutdown(Duration::from_secs(POLICY_RETRY_SECS), shutdown).await {
                return ConnectionEnd::Stopped;
            }
            continue;
        }

        // Simulated outage between sessions.
        if preset.offline_probability > 0.0
            && rand::thread_rng().gen_bool(preset.offline_probability)
        {
            return ConnectionEnd::Offline(Duration::from_secs(preset.offline_duration));
        }

        // Authorize.
        let id_tag = {
            let tags = &preset.id_tags;
            tags[rand::thread_rng().gen_range(0..tags.len())].clone()
        };
        let auth = match call_action::<AuthorizeRequest>(
            shared,
            outbox,
            timeout,
            &AuthorizeRequest {
                id_tag: id_tag.clone(),
            },
        )
        .await
        {
            Ok(response) => response,
            Err(OcppError::Cancelled) => return ConnectionEnd::Stopped,
            Err(e) => {
                debug!("{}: authorize failed: {e}", config.station_id);
                return ConnectionEnd::LinkLost;
            }
        };
        if auth.id_tag_info.status != swarm_types::v16j::AuthorizationStatus::Accepted {
            shared.logs.push(format!(
                "Authorization failed - {id_tag} ({:?})",
                auth.id_tag_info.status
            ));
            let idle = rand::thread_rng().gen_range(preset.idle_min..=preset.idle_max);
            if sleep_or_shutdown(Duration::from_secs(idle), shutdown).await {
                return ConnectionEnd::Stopped;
            }
            continue;
        }
        shared
            .logs
            .push(format!("Authorization successful - {id_tag}"));

        // Start the transaction.
        if send_status(shared, outbox, timeout, ChargePointStatus::Preparing)
            .await
            .is_err()
        {
            return ConnectionEnd::LinkLost;
        }
        let started_at = Utc::now();
        let start = match call_action::<StartTransactionRequest>(
            shared,
            outbox,
            timeout,
            &StartTransactionRequest {
                connector_id: CONNECTOR_ID,
                id_tag: id_tag.clone(),
                meter_start: 0,
                timestamp: started_at,
            },
        )
        .await
        {
            Ok(response) => response,
            Err(OcppError::Cancelled) => return ConnectionEnd::Stopped,
            Err(e) => {
                debug!("{}: start transaction failed: {e}", config.station_id);
                return ConnectionEnd::LinkLost;
            }
        };
        let tx = ActiveTx {
            id: start.transaction_id,
            started_at,
        };
        shared.set_current_transaction(Some(tx));
        shared.session_energy_wh.store(0.0);
        shared.logs.push(format!(
            "Charging started (price: ${:.2}, id_tag: {id_tag})",
            shared.price.load()
        ));
        if send_status(shared, outbox, timeout, ChargePointStatus::Charging)
            .await
            .is_err()
        {
            return ConnectionEnd::LinkLost;
        }

        // Meter loop under OCPP-cap precedence.
        let exit = meter_loop(config, shared, outbox, shutdown, down, tx).await;

        // Stop the transaction.
        let energy_wh = shared.session_energy_wh.load();
        let reason = match exit {
            MeterExit::Shutdown => Reason::HardReset,
            _ => Reason::Local,
        };
        let stop_result = call_action::<StopTransactionRequest>(
            shared,
            outbox,
            timeout,
            &StopTransactionRequest {
                transaction_id: tx.id,
                meter_stop: energy_wh.round() as i32,
                timestamp: Utc::now(),
                id_tag: Some(id_tag),
                reason: Some(reason),
            },
        )
        .await;
        shared.set_current_transaction(None);
        shared.last_power_w.store(0.0);
        shared.logs.push(format!(
            "Charging stopped ({:.2} kWh delivered)",
            energy_wh / 1000.0
        ));
        if let Err(e) = stop_result {
            debug!("{}: stop transaction failed: {e}", config.station_id);
        }

        let _ = send_status(shared, outbox, timeout, ChargePointStatus::Finishing).await;
        let _ = send_status(shared, outbox, timeout, ChargePointStatus::Available).await;

        match exit {
            MeterExit::Shutdown => return ConnectionEnd::Stopped,
            MeterExit::LinkDown => return ConnectionEnd::LinkLost,
            MeterExit::CapReached | MeterExit::PolicyStop => {}
        }
    }
}

async fn meter_loop(
    config: &AgentConfig,
    shared: &Arc<Shared>,
    outbox: &mpsc::Sender<LinkCommand>,
    shutdown: &mut watch::Receiver<bool>,
    down: &mut watch::Receiver<bool>,
    tx: ActiveTx,
) -> MeterExit {
    let preset = &config.preset;
    let timeout = config.transport.call_timeout;
    let max_wh = preset.max_energy_wh();
    let ctx = ChargingContext {
        transaction_id: Some(tx.id),
        transaction_start: Some(tx.started_at),
    };

    loop {
        let dt_secs =
            rand::thread_rng().gen_range(preset.sample_interval_min..=preset.sample_interval_max);
        if sleep_or_shutdown(Duration::from_secs(dt_secs), shutdown).await {
            return MeterExit::Shutdown;
        }
        if *down.borrow() {
            return MeterExit::LinkDown;
        }

        let now = Utc::now();
        let hour = now.hour() as u8;
        let price = shared.price.load();
        let session_wh = shared.session_energy_wh.load();
        let base_step =
            rand::thread_rng().gen_range(preset.energy_step_min..=preset.energy_step_max) as f64;

        // An active OCPP limit takes absolute precedence over the policy
        // engine; the policy is only consulted when no profile applies.
        let step = match shared.profiles.current_limit(CONNECTOR_ID, &ctx, now) {
            Some(cap_w) => {
                let step = capped_step(base_step, cap_w, dt_secs);
                if step < base_step {
                    shared.logs.push(format!(
                        "OCPP limit: {cap_w:.0}W → {step:.0}Wh this interval"
                    ));
                }
                step
            }
            None => {
                let decision = evaluate_meter_tick(
                    &PolicyStationState {
                        energy_dispensed_kwh: session_wh / 1000.0,
                        charging: true,
                        session_active: true,
                    },
                    &preset.policy_profile(),
                    &PolicyEnv {
                        current_price: price,
                        hour,
                    },
                    session_wh,
                    max_wh,
                );
                if decision.action == MeterAction::Stop {
                    shared.logs.push(format!("{} — stopping", decision.reason));
                    return MeterExit::PolicyStop;
                }
                if preset.peak_hours.contains(&hour) && preset.allow_peak {
                    soft_peak_step(base_step)
                } else {
                    base_step
                }
            }
        };

        // Session energy is monotonic and saturates at the cap.
        let next_wh = (session_wh + step).min(max_wh);
        let delivered = next_wh - session_wh;
        shared.session_energy_wh.store(next_wh);
        shared.lifetime_energy_wh.add(delivered);
        shared.earnings.add(delivered / 1000.0 * price);
        let power_w = delivered * 3600.0 / dt_secs as f64;
        shared.last_power_w.store(power_w);

        let request = MeterValuesRequest {
            connector_id: CONNECTOR_ID,
            transaction_id: Some(tx.id),
            meter_values: vec![MeterValue {
                timestamp: now,
                sampled_values: vec![
                    SampledValue::energy_register(next_wh),
                    SampledValue::power(power_w),
                ],
            }],
        };
        match call_action::<MeterValuesRequest>(shared, outbox, timeout, &request).await {
            Ok(_) => {}
            // Best effort: a lost MeterValues does not end the session.
            Err(OcppError::CallTimeout { .. }) => {
                shared.logs.push("MeterValues timed out, continuing");
            }
            Err(OcppError::Cancelled) => return MeterExit::Shutdown,
            Err(e) => {
                debug!("{}: meter values failed: {e}", config.station_id);
                return MeterExit::LinkDown;
            }
        }

        if next_wh >= max_wh {
            return MeterExit::CapReached;
        }
    }
}

/// Energy step under an active OCPP cap: `min(base, cap × Δt / 3600)`.
pub(crate) fn capped_step(base_step_wh: f64, cap_w: f64, dt_secs: u64) -> f64 {
    base_step_wh.min(cap_w * dt_secs as f64 / 3600.0)
}

/// Soft reduction while charging through an allowed peak hour: half the
/// step, floor 10 Wh.
pub(crate) fn soft_peak_step(base_step_wh: f64) -> f64 {
    (base_step_wh * 0.5).max(10.0)
}
