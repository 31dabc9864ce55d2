//! The station manager.
//!
//! Holds the fleet registry (reads are concurrent, mutations serialize),
//! allocates station ids from the smallest unused slot, and owns the
//! process-wide price cell. Smart-charging facades route by station id into
//! the CSMS session registry, so commands travel the real OCPP link.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use swarm_charging::TestProfileParams;
use swarm_csms::CsmsState;
use swarm_messages::v16j::{ClearChargingProfileRequest, GetCompositeScheduleResponse};
use swarm_station::{builtin_presets, AgentConfig, BehaviorPreset, StationAgent, StationSnapshot};
use swarm_types::v16j::{
    ChargingProfile, ChargingProfileStatus, ChargingRateUnit, ClearChargingProfileStatus,
};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::ManagerError;

/// Manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Base CSMS endpoint stations dial, e.g. `ws://127.0.0.1:9000/ocpp`.
    pub csms_base_url: String,
    /// Station id prefix; ids are `{prefix}-{:04}`.
    pub id_prefix: String,
    pub initial_price: f64,
    /// Upper bound accepted by `scale`.
    pub max_stations: usize,
    /// Simultaneous lifecycle operations in batch start/stop.
    pub batch_concurrency: usize,
    /// Delay between batch steps, keeping the CSMS off a thundering herd.
    pub batch_step_delay_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            csms_base_url: "ws://127.0.0.1:9000/ocpp".to_string(),
            id_prefix: "SWARM".to_string(),
            initial_price: 20.0,
            max_stations: 500,
            batch_concurrency: 10,
            batch_step_delay_ms: 100,
        }
    }
}

/// Aggregated fleet counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetTotals {
    pub total_energy_kwh: f64,
    pub total_earnings: f64,
    pub price_per_kwh: f64,
}

/// Process-wide price cell; readers are lock-free.
struct PriceCell(AtomicU64);

impl PriceCell {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// The fleet supervisor.
pub struct StationManager {
    config: ManagerConfig,
    presets: RwLock<HashMap<String, BehaviorPreset>>,
    registry: RwLock<BTreeMap<String, Arc<StationAgent>>>,
    price: PriceCell,
    csms: Arc<CsmsState>,
}

impl StationManager {
    pub fn new(config: ManagerConfig, csms: Arc<CsmsState>) -> Self {
        let price = PriceCell::new(config.initial_price);
        Self {
            config,
            presets: RwLock::new(builtin_presets()),
            registry: RwLock::new(BTreeMap::new()),
            price,
            csms,
        }
    }

    /// Add or replace a behavior preset.
    pub async fn register_preset(&self, preset: BehaviorPreset) -> Result<(), ManagerError> {
        preset.validate()?;
        self.presets
            .write()
            .await
            .insert(preset.name.clone(), preset);
        Ok(())
    }

    pub async fn preset_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.presets.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn preset(&self, name: &str) -> Result<BehaviorPreset, ManagerError> {
        self.presets
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ManagerError::UnknownPreset {
                name: name.to_string(),
            })
    }

    fn station_id_for_slot(&self, slot: usize) -> String {
        format!("{}-{:04}", self.config.id_prefix, slot)
    }

    /// Smallest slot whose id is unused.
    fn next_free_id(&self, registry: &BTreeMap<String, Arc<StationAgent>>) -> String {
        let mut slot = 1;
        loop {
            let id = self.station_id_for_slot(slot);
            if !registry.contains_key(&id) {
                return id;
            }
            slot += 1;
        }
    }

    fn build_agent(&self, station_id: String, preset: BehaviorPreset) -> Result<Arc<StationAgent>, ManagerError> {
        let mut agent_config = AgentConfig::new(station_id, self.config.csms_base_url.clone(), preset);
        agent_config.initial_price = self.price.load();
        Ok(Arc::new(StationAgent::new(agent_config)?))
    }

    /// Create (if needed) and start a station. Idempotent for a running id.
    pub async fn start_station(
        &self,
        station_id: &str,
        preset_name: &str,
    ) -> Result<StationSnapshot, ManagerError> {
        let preset = self.preset(preset_name).await?;
        let mut registry = self.registry.write().await;
        let agent = match registry.get(station_id) {
            Some(agent) => agent.clone(),
            None => {
                let agent = self.build_agent(station_id.to_string(), preset)?;
                registry.insert(station_id.to_string(), agent.clone());
                agent
            }
        };
        drop(registry);
        agent.start().await;
        Ok(agent.snapshot())
    }

    /// Stop a station, leaving it in the registry. Idempotent.
    pub async fn stop_station(&self, station_id: &str) -> Result<StationSnapshot, ManagerError> {
        let agent = self.agent(station_id).await?;
        agent.stop().await?;
        Ok(agent.snapshot())
    }

    /// Create or tear down agents so exactly `count` exist, all with the
    /// given preset. New ids fill the smallest unused slots; surplus
    /// stations are removed from the highest slot downwards.
    pub async fn scale(&self, count: usize, preset_name: &str) -> Result<usize, ManagerError> {
        if count > self.config.max_stations {
            return Err(ManagerError::InvalidCount {
                count,
                max: self.config.max_stations,
            });
        }
        let preset = self.preset(preset_name).await?;
        let mut registry = self.registry.write().await;

        // Stations whose preset differs get torn down and recreated.
        let mismatched: Vec<String> = registry
            .iter()
            .filter(|(_, agent)| agent.snapshot().profile != preset.name)
            .map(|(id, _)| id.clone())
            .collect();
        for id in mismatched {
            if let Some(agent) = registry.remove(&id) {
                let _ = agent.stop().await;
            }
        }

        // Tear down surplus, highest slot first (BTreeMap iterates sorted).
        while registry.len() > count {
            if let Some((id, agent)) = registry.pop_last() {
                info!("scale: removing {id}");
                let _ = agent.stop().await;
            }
        }

        // Fill up from the smallest unused slot.
        while registry.len() < count {
            let id = self.next_free_id(&registry);
            info!("scale: creating {id}");
            let agent = self.build_agent(id.clone(), preset.clone())?;
            agent.start().await;
            registry.insert(id, agent);
            tokio::time::sleep(Duration::from_millis(self.config.batch_step_delay_ms)).await;
        }

        Ok(registry.len())
    }

    /// Start every registered agent with bounded concurrency.
    pub async fn start_all(&self) -> usize {
        let agents = self.all_agents().await;
        let total = agents.len();
        for chunk in agents.chunks(self.config.batch_concurrency.max(1)) {
            join_all(chunk.iter().map(|agent| agent.start())).await;
            tokio::time::sleep(Duration::from_millis(self.config.batch_step_delay_ms)).await;
        }
        total
    }

    /// Stop every registered agent with bounded concurrency.
    pub async fn stop_all(&self) -> usize {
        let agents = self.all_agents().await;
        let total = agents.len();
        for chunk in agents.chunks(self.config.batch_concurrency.max(1)) {
            join_all(chunk.iter().map(|agent| agent.stop())).await;
            tokio::time::sleep(Duration::from_millis(self.config.batch_step_delay_ms)).await;
        }
        total
    }

    /// Stop the fleet and wait for clean closes; the manager is done after
    /// this returns.
    pub async fn shutdown(&self) {
        info!("manager shutting down {} stations", self.station_count().await);
        self.stop_all().await;
    }

    /// Update the process-wide price and fan it out to every agent.
    pub async fn set_price(&self, price: f64) -> Result<f64, ManagerError> {
        if !price.is_finite() || price <= 0.0 {
            return Err(ManagerError::InvalidPrice { price });
        }
        self.price.store(price);
        for agent in self.all_agents().await {
            agent.apply_price(price);
        }
        info!("price set to {price:.2}");
        Ok(price)
    }

    pub fn get_price(&self) -> f64 {
        self.price.load()
    }

    pub async fn station_count(&self) -> usize {
        self.registry.read().await.len()
    }

    pub async fn snapshots(&self) -> Vec<StationSnapshot> {
        self.registry
            .read()
            .await
            .values()
            .map(|agent| agent.snapshot())
            .collect()
    }

    pub async fn totals(&self) -> FleetTotals {
        let snapshots = self.snapshots().await;
        FleetTotals {
            total_energy_kwh: snapshots.iter().map(|s| s.total_energy_kwh).sum(),
            total_earnings: snapshots.iter().map(|s| s.total_earnings).sum(),
            price_per_kwh: self.get_price(),
        }
    }

    pub async fn station_logs(&self, station_id: &str) -> Result<Vec<String>, ManagerError> {
        Ok(self.agent(station_id).await?.logs())
    }

    pub async fn station_snapshot(&self, station_id: &str) -> Result<StationSnapshot, ManagerError> {
        Ok(self.agent(station_id).await?.snapshot())
    }

    // -- CSMS facades ------------------------------------------------------

    /// Push a charging profile over the station's OCPP session.
    pub async fn send_charging_profile(
        &self,
        station_id: &str,
        connector_id: u32,
        profile: ChargingProfile,
    ) -> Result<(i32, ChargingProfileStatus), ManagerError> {
        self.require_known(station_id).await?;
        Ok(self
            .csms
            .send_charging_profile(station_id, connector_id, profile)
            .await?)
    }

    pub async fn get_composite_schedule(
        &self,
        station_id: &str,
        connector_id: u32,
        duration: i32,
        unit: Option<ChargingRateUnit>,
    ) -> Result<GetCompositeScheduleResponse, ManagerError> {
        self.require_known(station_id).await?;
        Ok(self
            .csms
            .get_composite_schedule(station_id, connector_id, duration, unit)
            .await?)
    }

    pub async fn clear_charging_profile(
        &self,
        station_id: &str,
        filter: ClearChargingProfileRequest,
    ) -> Result<ClearChargingProfileStatus, ManagerError> {
        self.require_known(station_id).await?;
        Ok(self.csms.clear_charging_profile(station_id, filter).await?)
    }

    /// Build a scenario profile and push it, returning the profile too so
    /// the caller can show what was generated.
    pub async fn send_test_profile(
        &self,
        station_id: &str,
        params: &TestProfileParams,
    ) -> Result<(ChargingProfile, ChargingProfileStatus), ManagerError> {
        self.require_known(station_id).await?;
        let profile = params.build(chrono::Utc::now())?;
        let (_, status) = self
            .csms
            .send_charging_profile(station_id, params.connector_id, profile.clone())
            .await?;
        Ok((profile, status))
    }

    async fn agent(&self, station_id: &str) -> Result<Arc<StationAgent>, ManagerError> {
        self.registry
            .read()
            .await
            .get(station_id)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound {
                station_id: station_id.to_string(),
            })
    }

    async fn require_known(&self, station_id: &str) -> Result<(), ManagerError> {
        self.agent(station_id).await.map(|_| ())
    }

    async fn all_agents(&self) -> Vec<Arc<StationAgent>> {
        self.registry.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_csms::CsmsConfig;

    fn manager() -> StationManager {
        let csms = Arc::new(CsmsState::new(CsmsConfig::default()));
        StationManager::new(ManagerConfig::default(), csms)
    }

    #[tokio::test]
    async fn id_allocation_fills_smallest_slot() {
        let m = manager();
        // Unconnected CSMS: agents just retry in the background.
        m.start_station("SWARM-0001", "default").await.unwrap();
        m.start_station("SWARM-0002", "default").await.unwrap();
        {
            let registry = m.registry.read().await;
            assert_eq!(m.next_free_id(&registry), "SWARM-0003");
        }
        m.stop_station("SWARM-0001").await.unwrap();
        {
            let mut registry = m.registry.write().await;
            registry.remove("SWARM-0001");
            assert_eq!(m.next_free_id(&registry), "SWARM-0001");
        }
        m.shutdown().await;
    }

    #[tokio::test]
    async fn scale_up_and_down() {
        let m = manager();
        let count = m.scale(3, "default").await.unwrap();
        assert_eq!(count, 3);
        let ids: Vec<String> = m.snapshots().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["SWARM-0001", "SWARM-0002", "SWARM-0003"]);

        // Scaling down removes the highest slots.
        let count = m.scale(1, "default").await.unwrap();
        assert_eq!(count, 1);
        let ids: Vec<String> = m.snapshots().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["SWARM-0001"]);
        m.shutdown().await;
    }

    #[tokio::test]
    async fn scale_replaces_mismatched_presets() {
        let m = manager();
        m.scale(2, "default").await.unwrap();
        m.scale(2, "busy").await.unwrap();
        for snapshot in m.snapshots().await {
            assert_eq!(snapshot.profile, "busy");
        }
        m.shutdown().await;
    }

    #[tokio::test]
    async fn scale_rejects_excessive_count() {
        let m = manager();
        let err = m.scale(100_000, "default").await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidCount { .. }));
    }

    #[tokio::test]
    async fn unknown_preset_is_rejected() {
        let m = manager();
        let err = m.start_station("SWARM-0001", "warp-speed").await.unwrap_err();
        assert!(matches!(err, ManagerError::UnknownPreset { .. }));
    }

    #[tokio::test]
    async fn price_validation_and_fanout() {
        let m = manager();
        m.start_station("SWARM-0001", "default").await.unwrap();

        assert!(matches!(
            m.set_price(0.0).await,
            Err(ManagerError::InvalidPrice { .. })
        ));
        assert!(matches!(
            m.set_price(-3.0).await,
            Err(ManagerError::InvalidPrice { .. })
        ));

        m.set_price(31.5).await.unwrap();
        assert_eq!(m.get_price(), 31.5);
        m.shutdown().await;
    }

    #[tokio::test]
    async fn totals_start_at_zero() {
        let m = manager();
        m.start_station("SWARM-0001", "default").await.unwrap();
        let totals = m.totals().await;
        assert_eq!(totals.total_energy_kwh, 0.0);
        assert_eq!(totals.total_earnings, 0.0);
        assert_eq!(totals.price_per_kwh, 20.0);
        m.shutdown().await;
    }

    #[tokio::test]
    async fn logs_for_unknown_station_fail() {
        let m = manager();
        let err = m.station_logs("SWARM-0404").await.unwrap_err();
        assert!(matches!(err, ManagerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn facade_requires_known_station() {
        let m = manager();
        let err = m
            .get_composite_schedule("SWARM-0404", 1, 3600, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let m = manager();
        m.start_station("SWARM-0001", "default").await.unwrap();
        m.stop_station("SWARM-0001").await.unwrap();
        m.stop_station("SWARM-0001").await.unwrap();
    }

    #[tokio::test]
    async fn custom_preset_registration() {
        let m = manager();
        let mut preset = BehaviorPreset::default();
        preset.name = "bench".to_string();
        preset.idle_min = 1;
        preset.idle_max = 2;
        m.register_preset(preset).await.unwrap();
        assert!(m.preset_names().await.contains(&"bench".to_string()));
        m.start_station("SWARM-0001", "bench").await.unwrap();
        m.shutdown().await;
    }
}
