//! Process-wide CSMS state: the session registry, the transaction table and
//! the monotonic transaction-id allocator.
//!
//! Sessions share nothing with each other; the registry and the allocator
//! are the only cross-session state. CSMS-originated calls to one station
//! are serialized to one in flight at a time; excess callers queue on the
//! session's operation lock.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use swarm_charging::{energy_cap_profile, peak_shaving_profile, time_of_use_profile};
use swarm_messages::v16j::*;
use swarm_messages::OcppAction;
use swarm_transport::{call_over, CallRouter, LinkCommand};
use swarm_types::v16j::{
    ChargePointStatus, ChargingProfile, ChargingProfileStatus, ChargingRateUnit,
    ClearChargingProfileStatus,
};
use swarm_types::{OcppError, OcppResult, Uuid};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::error::{CsmsError, CsmsResult};
use crate::CsmsConfig;

/// A transaction as recorded by the CSMS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: i32,
    pub station_id: String,
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: i32,
    pub started_at: DateTime<Utc>,
    /// Latest energy register seen via MeterValues, Wh.
    pub meter_last: Option<i32>,
    pub last_update: Option<DateTime<Utc>>,
    pub meter_stop: Option<i32>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    pub fn is_active(&self) -> bool {
        self.stopped_at.is_none()
    }
}

/// Latest StatusNotification per (station, connector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorStatusRecord {
    pub status: ChargePointStatus,
    pub updated_at: DateTime<Utc>,
}

/// Server side of one station session. Owns the write half (through the
/// writer task's channel) and the pending-call router for CSMS-originated
/// calls.
pub struct SessionHandle {
    pub session_id: Uuid,
    pub station_id: String,
    pub connected_at: DateTime<Utc>,
    pub(crate) outbox: mpsc::Sender<LinkCommand>,
    pub(crate) router: CallRouter,
    op_lock: Mutex<()>,
    call_timeout: Duration,
}

impl SessionHandle {
    pub(crate) fn new(
        station_id: String,
        outbox: mpsc::Sender<LinkCommand>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            station_id,
            connected_at: Utc::now(),
            outbox,
            router: CallRouter::new(),
            op_lock: Mutex::new(()),
            call_timeout,
        }
    }

    /// Issue a CSMS-originated CALL into this session. Calls to the same
    /// station are serialized; concurrent callers queue here.
    pub async fn call<T: OcppAction>(&self, payload: &T) -> OcppResult<T::Response> {
        let _guard = self.op_lock.lock().await;
        let value = call_over(
            &self.router,
            &self.outbox,
            T::ACTION_NAME,
            serde_json::to_value(payload)?,
            self.call_timeout,
        )
        .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Ask the writer task to close the socket.
    pub(crate) async fn close(&self) {
        let _ = self.outbox.send(LinkCommand::Close).await;
    }
}

/// Shared CSMS state handed to the server and the control plane.
pub struct CsmsState {
    pub config: CsmsConfig,
    sessions: DashMap<String, Arc<SessionHandle>>,
    transactions: DashMap<i32, TransactionRecord>,
    statuses: DashMap<(String, u32), ConnectorStatusRecord>,
    next_transaction_id: AtomicI32,
}

impl CsmsState {
    pub fn new(config: CsmsConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            transactions: DashMap::new(),
            statuses: DashMap::new(),
            next_transaction_id: AtomicI32::new(1),
        }
    }

    /// Monotonically increasing transaction ids, process-wide.
    pub fn allocate_transaction_id(&self) -> i32 {
        self.next_transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn is_connected(&self, station_id: &str) -> bool {
        self.sessions.contains_key(station_id)
    }

    pub fn connected_stations(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, station_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(station_id).map(|e| e.value().clone())
    }

    /// Register a new session. On a duplicate id the old session is closed
    /// and replaced when configured, refused otherwise.
    pub(crate) async fn register_session(
        &self,
        handle: Arc<SessionHandle>,
    ) -> CsmsResult<()> {
        if let Some(existing) = self.session(&handle.station_id) {
            if !self.config.replace_existing {
                return Err(CsmsError::DuplicateSession {
                    station_id: handle.station_id.clone(),
                });
            }
            info!("{}: replacing existing session", handle.station_id);
            existing.close().await;
            existing.router.fail_all(|_| OcppError::StationDisconnected {
                station_id: handle.station_id.clone(),
            });
        }
        info!("{}: session registered", handle.station_id);
        self.sessions
            .insert(handle.station_id.clone(), handle);
        Ok(())
    }

    /// Drop a session from the registry (only if it still owns the entry)
    /// and fail its pending CSMS-originated calls.
    pub(crate) fn remove_session(&self, handle: &SessionHandle) {
        let removed = self
            .sessions
            .remove_if(&handle.station_id, |_, v| v.session_id == handle.session_id)
            .is_some();
        if removed {
            info!("{}: session removed", handle.station_id);
        }
        handle.router.fail_all(|_| OcppError::StationDisconnected {
            station_id: handle.station_id.clone(),
        });
    }

    // -- transaction / status bookkeeping (called by session handlers) ----

    pub(crate) fn record_transaction_start(
        &self,
        station_id: &str,
        connector_id: u32,
        id_tag: &str,
        meter_start: i32,
        started_at: DateTime<Utc>,
    ) -> i32 {
        let transaction_id = self.allocate_transaction_id();
        self.transactions.insert(
            transaction_id,
            TransactionRecord {
                transaction_id,
                station_id: station_id.to_string(),
                connector_id,
                id_tag: id_tag.to_string(),
                meter_start,
                started_at,
                meter_last: None,
                last_update: None,
                meter_stop: None,
                stopped_at: None,
            },
        );
        transaction_id
    }

    pub(crate) fn record_meter_values(&self, transaction_id: i32, energy_wh: i32) {
        if let Some(mut record) = self.transactions.get_mut(&transaction_id) {
            record.meter_last = Some(energy_wh);
            record.last_update = Some(Utc::now());
        }
    }

    pub(crate) fn record_transaction_stop(&self, transaction_id: i32, meter_stop: i32) {
        if let Some(mut record) = self.transactions.get_mut(&transaction_id) {
            record.meter_stop = Some(meter_stop);
            record.stopped_at = Some(Utc::now());
        } else {
            debug!("StopTransaction for unknown transaction {transaction_id}");
        }
    }

    pub(crate) fn record_status(&self, station_id: &str, connector_id: u32, status: ChargePointStatus) {
        self.statuses.insert(
            (station_id.to_string(), connector_id),
            ConnectorStatusRecord {
                status,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn transaction(&self, transaction_id: i32) -> Option<TransactionRecord> {
        self.transactions.get(&transaction_id).map(|r| r.clone())
    }

    pub fn transactions_for(&self, station_id: &str) -> Vec<TransactionRecord> {
        self.transactions
            .iter()
            .filter(|r| r.station_id == station_id)
            .map(|r| r.clone())
            .collect()
    }

    pub fn connector_status(&self, station_id: &str, connector_id: u32) -> Option<ConnectorStatusRecord> {
        self.statuses
            .get(&(station_id.to_string(), connector_id))
            .map(|r| r.clone())
    }

    // -- CSMS-originated smart charging -----------------------------------

    /// Push a charging profile to a connected station.
    pub async fn send_charging_profile(
        &self,
        station_id: &str,
        connector_id: u32,
        profile: ChargingProfile,
    ) -> CsmsResult<(i32, ChargingProfileStatus)> {
        let session = self.require_session(station_id)?;
        let profile_id = profile.charging_profile_id;
        info!(
            "{station_id}: SetChargingProfile {profile_id} on connector {connector_id}"
        );
        let response = session
            .call(&SetChargingProfileRequest {
                connector_id,
                cs_charging_profiles: profile,
            })
            .await
            .map_err(|e| self.map_call_error(station_id, e))?;
        Ok((profile_id, response.status))
    }

    /// Ask a station for its composite schedule.
    pub async fn get_composite_schedule(
        &self,
        station_id: &str,
        connector_id: u32,
        duration: i32,
        unit: Option<ChargingRateUnit>,
    ) -> CsmsResult<GetCompositeScheduleResponse> {
        let session = self.require_session(station_id)?;
        session
            .call(&GetCompositeScheduleRequest {
                connector_id,
                duration,
                charging_rate_unit: unit,
            })
            .await
            .map_err(|e| self.map_call_error(station_id, e))
    }

    /// Clear profiles on a connected station.
    pub async fn clear_charging_profile(
        &self,
        station_id: &str,
        filter: ClearChargingProfileRequest,
    ) -> CsmsResult<ClearChargingProfileStatus> {
        let session = self.require_session(station_id)?;
        let response = session
            .call(&filter)
            .await
            .map_err(|e| self.map_call_error(station_id, e))?;
        Ok(response.status)
    }

    /// Canonical peak-shaving profile: station-wide power ceiling.
    pub async fn send_peak_shaving(
        &self,
        station_id: &str,
        max_power_w: f64,
    ) -> CsmsResult<(i32, ChargingProfileStatus)> {
        let profile = peak_shaving_profile(1, max_power_w, Utc::now());
        self.send_charging_profile(station_id, 0, profile).await
    }

    /// Canonical time-of-use profile: daily peak/off-peak split.
    pub async fn send_time_of_use(
        &self,
        station_id: &str,
        off_peak_w: f64,
        peak_w: f64,
        peak_start_hour: u32,
        peak_end_hour: u32,
    ) -> CsmsResult<(i32, ChargingProfileStatus)> {
        let profile = time_of_use_profile(
            2,
            off_peak_w,
            peak_w,
            peak_start_hour,
            peak_end_hour,
            Utc::now(),
        );
        self.send_charging_profile(station_id, 1, profile).await
    }

    /// Canonical energy-cap profile for one transaction.
    pub async fn send_energy_cap(
        &self,
        station_id: &str,
        transaction_id: i32,
        max_energy_wh: f64,
        duration_secs: i32,
        power_limit_w: f64,
    ) -> CsmsResult<(i32, ChargingProfileStatus)> {
        let profile = energy_cap_profile(
            3,
            transaction_id,
            max_energy_wh,
            duration_secs,
            power_limit_w,
            Utc::now(),
        );
        self.send_charging_profile(station_id, 1, profile).await
    }

    fn require_session(&self, station_id: &str) -> CsmsResult<Arc<SessionHandle>> {
        self.session(station_id)
            .ok_or_else(|| CsmsError::StationDisconnected {
                station_id: station_id.to_string(),
            })
    }

    fn map_call_error(&self, station_id: &str, err: OcppError) -> CsmsError {
        match err {
            OcppError::StationDisconnected { station_id } => {
                CsmsError::StationDisconnected { station_id }
            }
            OcppError::Transport { .. } | OcppError::Cancelled => CsmsError::StationDisconnected {
                station_id: station_id.to_string(),
            },
            other => CsmsError::Ocpp(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> CsmsState {
        CsmsState::new(CsmsConfig::default())
    }

    fn handle(station_id: &str) -> (Arc<SessionHandle>, mpsc::Receiver<LinkCommand>) {
        let (tx, rx) = mpsc::channel(8);
        (
            Arc::new(SessionHandle::new(
                station_id.to_string(),
                tx,
                Duration::from_secs(1),
            )),
            rx,
        )
    }

    #[test]
    fn transaction_ids_are_monotonic() {
        let state = state();
        let a = state.allocate_transaction_id();
        let b = state.allocate_transaction_id();
        let c = state.allocate_transaction_id();
        assert!(a < b && b < c);
        assert_eq!(a, 1);
    }

    #[tokio::test]
    async fn register_and_remove_session() {
        let state = state();
        let (h, _rx) = handle("SWARM-0001");
        state.register_session(h.clone()).await.unwrap();
        assert!(state.is_connected("SWARM-0001"));
        assert_eq!(state.session_count(), 1);

        state.remove_session(&h);
        assert!(!state.is_connected("SWARM-0001"));
    }

    #[tokio::test]
    async fn duplicate_session_refused_by_default() {
        let state = state();
        let (h1, _rx1) = handle("SWARM-0001");
        let (h2, _rx2) = handle("SWARM-0001");
        state.register_session(h1).await.unwrap();
        let err = state.register_session(h2).await.unwrap_err();
        assert!(matches!(err, CsmsError::DuplicateSession { .. }));
    }

    #[tokio::test]
    async fn duplicate_session_replaces_when_configured() {
        let mut config = CsmsConfig::default();
        config.replace_existing = true;
        let state = CsmsState::new(config);

        let (h1, mut rx1) = handle("SWARM-0001");
        let (h2, _rx2) = handle("SWARM-0001");
        let new_id = h2.session_id;
        state.register_session(h1.clone()).await.unwrap();
        state.register_session(h2).await.unwrap();

        // Old session got a close command; new one owns the registry entry.
        assert!(matches!(rx1.recv().await, Some(LinkCommand::Close)));
        assert_eq!(state.session("SWARM-0001").unwrap().session_id, new_id);

        // Removing the old handle must not evict the replacement.
        state.remove_session(&h1);
        assert!(state.is_connected("SWARM-0001"));
    }

    #[tokio::test]
    async fn stale_remove_does_not_evict_new_session() {
        let state = state();
        let (h1, _rx1) = handle("SWARM-0001");
        state.register_session(h1.clone()).await.unwrap();
        state.remove_session(&h1);

        let (h2, _rx2) = handle("SWARM-0001");
        state.register_session(h2).await.unwrap();
        state.remove_session(&h1); // stale
        assert!(state.is_connected("SWARM-0001"));
    }

    #[test]
    fn transaction_bookkeeping() {
        let state = state();
        let tx_id =
            state.record_transaction_start("SWARM-0001", 1, "TAG001", 0, Utc::now());
        assert_eq!(tx_id, 1);

        let record = state.transaction(tx_id).unwrap();
        assert!(record.is_active());
        assert_eq!(record.id_tag, "TAG001");

        state.record_meter_values(tx_id, 4200);
        assert_eq!(state.transaction(tx_id).unwrap().meter_last, Some(4200));

        state.record_transaction_stop(tx_id, 5000);
        let record = state.transaction(tx_id).unwrap();
        assert!(!record.is_active());
        assert_eq!(record.meter_stop, Some(5000));

        assert_eq!(state.transactions_for("SWARM-0001").len(), 1);
        assert!(state.transactions_for("SWARM-9999").is_empty());
    }

    #[test]
    fn status_bookkeeping() {
        let state = state();
        state.record_status("SWARM-0001", 1, ChargePointStatus::Charging);
        let record = state.connector_status("SWARM-0001", 1).unwrap();
        assert_eq!(record.status, ChargePointStatus::Charging);
        assert!(state.connector_status("SWARM-0001", 2).is_none());
    }

    #[tokio::test]
    async fn originated_call_without_session_fails_fast() {
        let state = state();
        let err = state
            .send_peak_shaving("SWARM-0404", 7400.0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CsmsError::StationDisconnected { station_id } if station_id == "SWARM-0404"
        ));
    }
}
