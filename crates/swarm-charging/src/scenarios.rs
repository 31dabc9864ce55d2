//! Canonical smart-charging profiles the CSMS pushes to stations.
//!
//! Three shapes cover the operator scenarios: a station-wide power ceiling
//! (peak shaving), a daily-recurring tariff split (time of use), and a
//! per-transaction cap (energy cap). The control plane exposes the same
//! constructors through [`TestProfileParams`].

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use swarm_types::v16j::{
    ChargingProfile, ChargingProfileKind, ChargingProfilePurpose, ChargingRateUnit,
    ChargingSchedule, ChargingSchedulePeriod, RecurrencyKind,
};
use swarm_types::{OcppError, OcppResult};

fn watt_period(start_period: i32, limit: f64) -> ChargingSchedulePeriod {
    ChargingSchedulePeriod {
        start_period,
        limit,
        number_phases: None,
    }
}

/// ChargePointMaxProfile capping the whole station at `max_power_w`.
pub fn peak_shaving_profile(
    profile_id: i32,
    max_power_w: f64,
    now: DateTime<Utc>,
) -> ChargingProfile {
    ChargingProfile {
        charging_profile_id: profile_id,
        transaction_id: None,
        stack_level: 0,
        charging_profile_purpose: ChargingProfilePurpose::ChargePointMaxProfile,
        charging_profile_kind: ChargingProfileKind::Absolute,
        recurrency_kind: None,
        valid_from: None,
        valid_to: None,
        charging_schedule: ChargingSchedule {
            duration: None,
            start_schedule: Some(now),
            charging_rate_unit: ChargingRateUnit::W,
            charging_schedule_period: vec![watt_period(0, max_power_w)],
            min_charging_rate: None,
        },
    }
}

/// Daily-recurring TxDefaultProfile: `off_peak_w` outside the peak window,
/// `peak_w` between `peak_start_hour` and `peak_end_hour`.
pub fn time_of_use_profile(
    profile_id: i32,
    off_peak_w: f64,
    peak_w: f64,
    peak_start_hour: u32,
    peak_end_hour: u32,
    now: DateTime<Utc>,
) -> ChargingProfile {
    let midnight = now
        .with_hour(0)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);

    ChargingProfile {
        charging_profile_id: profile_id,
        transaction_id: None,
        stack_level: 0,
        charging_profile_purpose: ChargingProfilePurpose::TxDefaultProfile,
        charging_profile_kind: ChargingProfileKind::Recurring,
        recurrency_kind: Some(RecurrencyKind::Daily),
        valid_from: None,
        valid_to: None,
        charging_schedule: ChargingSchedule {
            duration: Some(86_400),
            start_schedule: Some(midnight),
            charging_rate_unit: ChargingRateUnit::W,
            charging_schedule_period: vec![
                watt_period(0, off_peak_w),
                watt_period((peak_start_hour * 3600) as i32, peak_w),
                watt_period((peak_end_hour * 3600) as i32, off_peak_w),
            ],
            min_charging_rate: None,
        },
    }
}

/// TxProfile bounding one transaction. The energy cap is enforced through
/// duration: running at `power_limit_w` for the profile's lifetime delivers
/// at most `max_energy_wh`, so the duration is clamped accordingly.
pub fn energy_cap_profile(
    profile_id: i32,
    transaction_id: i32,
    max_energy_wh: f64,
    duration_secs: i32,
    power_limit_w: f64,
    now: DateTime<Utc>,
) -> ChargingProfile {
    let cap_secs = if power_limit_w > 0.0 {
        (max_energy_wh / power_limit_w * 3600.0).ceil() as i32
    } else {
        duration_secs
    };

    ChargingProfile {
        charging_profile_id: profile_id,
        transaction_id: Some(transaction_id),
        stack_level: 0,
        charging_profile_purpose: ChargingProfilePurpose::TxProfile,
        charging_profile_kind: ChargingProfileKind::Absolute,
        recurrency_kind: None,
        valid_from: None,
        valid_to: None,
        charging_schedule: ChargingSchedule {
            duration: Some(duration_secs.min(cap_secs)),
            start_schedule: Some(now),
            charging_rate_unit: ChargingRateUnit::W,
            charging_schedule_period: vec![watt_period(0, power_limit_w)],
            min_charging_rate: None,
        },
    }
}

/// Control-plane request for a generated test profile. Per-scenario
/// parameters are validated before the profile is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestProfileParams {
    pub scenario: String,
    #[serde(default = "default_connector")]
    pub connector_id: u32,
    // peak_shaving
    pub max_power_w: Option<f64>,
    // time_of_use
    pub off_peak_w: Option<f64>,
    pub peak_w: Option<f64>,
    pub peak_start_hour: Option<u32>,
    pub peak_end_hour: Option<u32>,
    // energy_cap
    pub transaction_id: Option<i32>,
    pub max_energy_wh: Option<f64>,
    pub duration_seconds: Option<i32>,
    pub power_limit_w: Option<f64>,
}

fn default_connector() -> u32 {
    1
}

impl TestProfileParams {
    /// Build the profile for the requested scenario, rejecting missing or
    /// out-of-range parameters with a descriptive error.
    pub fn build(&self, now: DateTime<Utc>) -> OcppResult<ChargingProfile> {
        match self.scenario.as_str() {
            "peak_shaving" => {
                let max_power_w = self.require_f64("max_power_w", self.max_power_w)?;
                Ok(peak_shaving_profile(1, max_power_w, now))
            }
            "time_of_use" => {
                let off_peak_w = self.require_f64("off_peak_w", self.off_peak_w)?;
                let peak_w = self.require_f64("peak_w", self.peak_w)?;
                let start = self.require_hour("peak_start_hour", self.peak_start_hour)?;
                let end = self.require_hour("peak_end_hour", self.peak_end_hour)?;
                if start >= end {
                    return Err(OcppError::Validation {
                        message: format!(
                            "peak_start_hour ({start}) must be before peak_end_hour ({end})"
                        ),
                    });
                }
                Ok(time_of_use_profile(2, off_peak_w, peak_w, start, end, now))
            }
            "energy_cap" => {
                let transaction_id =
                    self.transaction_id
                        .ok_or_else(|| OcppError::Validation {
                            message: "transaction_id is required for energy_cap".to_string(),
                        })?;
                let max_energy_wh = self.require_f64("max_energy_wh", self.max_energy_wh)?;
                let duration = self
                    .duration_seconds
                    .filter(|d| *d > 0)
                    .ok_or_else(|| OcppError::Validation {
                        message: "duration_seconds must be a positive integer".to_string(),
                    })?;
                let power_limit_w = self.require_f64("power_limit_w", self.power_limit_w)?;
                Ok(energy_cap_profile(
                    3,
                    transaction_id,
                    max_energy_wh,
                    duration,
                    power_limit_w,
                    now,
                ))
            }
            other => Err(OcppError::Validation {
                message: format!(
                    "unknown scenario '{other}' (valid: peak_shaving, time_of_use, energy_cap)"
                ),
            }),
        }
    }

    fn require_f64(&self, name: &str, value: Option<f64>) -> OcppResult<f64> {
        match value {
            Some(v) if v > 0.0 => Ok(v),
            Some(v) => Err(OcppError::Validation {
                message: format!("{name} must be positive, got {v}"),
            }),
            None => Err(OcppError::Validation {
                message: format!("{name} is required for {}", self.scenario),
            }),
        }
    }

    fn require_hour(&self, name: &str, value: Option<u32>) -> OcppResult<u32> {
        match value {
            Some(v) if v <= 23 => Ok(v),
            Some(v) => Err(OcppError::Validation {
                message: format!("{name} must be in 0..=23, got {v}"),
            }),
            None => Err(OcppError::Validation {
                message: format!("{name} is required for {}", self.scenario),
            }),
        }
    }
}
