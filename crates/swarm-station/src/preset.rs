//! Station behavior presets.
//!
//! A preset fixes how a virtual station behaves for its whole lifetime:
//! cadence of sessions and samples, energy step range, flakiness, and the
//! smart-charging constraints fed to the policy engine.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use swarm_charging::PolicyProfile;
use swarm_types::{OcppError, OcppResult};

/// Immutable behavior preset for a station. Replaced only by a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorPreset {
    pub name: String,

    /// Heartbeat cadence in seconds (the CSMS may override at boot).
    pub heartbeat_interval: u64,

    /// Idle window between sessions, seconds.
    pub idle_min: u64,
    pub idle_max: u64,

    /// Per-sample energy increment range, Wh.
    pub energy_step_min: u32,
    pub energy_step_max: u32,

    /// Meter sample cadence, seconds.
    pub sample_interval_min: u64,
    pub sample_interval_max: u64,

    pub enable_transactions: bool,

    /// Chance of simulating an outage after a session, and its length.
    pub offline_probability: f64,
    pub offline_duration: u64,

    pub id_tags: Vec<String>,

    // Smart charging
    pub charge_if_price_below: f64,
    pub max_energy_kwh: f64,
    pub allow_peak: bool,
    pub peak_hours: BTreeSet<u8>,
}

impl BehaviorPreset {
    /// The policy-engine view of this preset.
    pub fn policy_profile(&self) -> PolicyProfile {
        PolicyProfile {
            charge_if_price_below: self.charge_if_price_below,
            max_energy_kwh: self.max_energy_kwh,
            allow_peak_hours: self.allow_peak,
            peak_hours: self.peak_hours.clone(),
        }
    }

    pub fn max_energy_wh(&self) -> f64 {
        self.max_energy_kwh * 1000.0
    }

    pub fn validate(&self) -> OcppResult<()> {
        if self.name.is_empty() {
            return Err(OcppError::Validation {
                message: "preset name must not be empty".to_string(),
            });
        }
        if self.idle_min > self.idle_max {
            return Err(OcppError::Validation {
                message: format!("idle_min {} > idle_max {}", self.idle_min, self.idle_max),
            });
        }
        if self.energy_step_min == 0 || self.energy_step_min > self.energy_step_max {
            return Err(OcppError::Validation {
                message: format!(
                    "energy step range {}..{} is invalid",
                    self.energy_step_min, self.energy_step_max
                ),
            });
        }
        if self.sample_interval_min == 0 || self.sample_interval_min > self.sample_interval_max {
            return Err(OcppError::Validation {
                message: format!(
                    "sample interval range {}..{} is invalid",
                    self.sample_interval_min, self.sample_interval_max
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.offline_probability) {
            return Err(OcppError::Validation {
                message: format!(
                    "offline_probability {} outside [0, 1]",
                    self.offline_probability
                ),
            });
        }
        if self.id_tags.is_empty() {
            return Err(OcppError::Validation {
                message: "id_tags must not be empty".to_string(),
            });
        }
        if self.max_energy_kwh <= 0.0 {
            return Err(OcppError::Validation {
                message: format!("max_energy_kwh {} must be positive", self.max_energy_kwh),
            });
        }
        if self.peak_hours.iter().any(|h| *h > 23) {
            return Err(OcppError::Validation {
                message: "peak_hours entries must be in 0..=23".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for BehaviorPreset {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            heartbeat_interval: 60,
            idle_min: 30,
            idle_max: 120,
            energy_step_min: 50,
            energy_step_max: 150,
            sample_interval_min: 10,
            sample_interval_max: 20,
            enable_transactions: true,
            offline_probability: 0.0,
            offline_duration: 0,
            id_tags: vec![
                "ABC123".to_string(),
                "TAG001".to_string(),
                "USER42".to_string(),
            ],
            charge_if_price_below: 25.0,
            max_energy_kwh: 30.0,
            allow_peak: true,
            peak_hours: (8..18).collect(),
        }
    }
}

/// The built-in preset catalog, keyed by name.
pub fn builtin_presets() -> HashMap<String, BehaviorPreset> {
    let default = BehaviorPreset::default();

    let busy = BehaviorPreset {
        name: "busy".to_string(),
        idle_min: 5,
        idle_max: 20,
        energy_step_min: 80,
        energy_step_max: 220,
        charge_if_price_below: 30.0,
        max_energy_kwh: 40.0,
        ..default.clone()
    };

    let idle = BehaviorPreset {
        name: "idle".to_string(),
        idle_min: 180,
        idle_max: 600,
        charge_if_price_below: 18.0,
        max_energy_kwh: 20.0,
        allow_peak: false,
        ..default.clone()
    };

    let flaky = BehaviorPreset {
        name: "flaky".to_string(),
        idle_min: 20,
        idle_max: 60,
        offline_probability: 0.1,
        offline_duration: 30,
        charge_if_price_below: 20.0,
        max_energy_kwh: 25.0,
        ..default.clone()
    };

    [default, busy, idle, flaky]
        .into_iter()
        .map(|preset| (preset.name.clone(), preset))
        .collect()
}
