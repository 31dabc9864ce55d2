//! Charging-policy engine.
//!
//! A pure decision function: no clock access, no logging, no external state.
//! The caller supplies everything through the three input structs and acts on
//! the returned decision; the reason string is what ends up in station logs.
//!
//! Rules, evaluated strictly in order:
//!
//! 1. session energy at or above the cap → pause
//! 2. price strictly above the threshold → wait (equality charges)
//! 3. current hour in the peak set while peak charging is disallowed → wait
//! 4. otherwise → charge

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Station-side inputs to a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyStationState {
    /// Energy delivered in the current session, kWh.
    pub energy_dispensed_kwh: f64,
    pub charging: bool,
    pub session_active: bool,
}

impl PolicyStationState {
    /// State at the top of a fresh session.
    pub fn fresh() -> Self {
        Self {
            energy_dispensed_kwh: 0.0,
            charging: false,
            session_active: false,
        }
    }
}

/// Smart-charging constraints from the station's behavior preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyProfile {
    /// Charge only while the price is at or below this threshold.
    pub charge_if_price_below: f64,
    /// Per-session energy cap, kWh.
    pub max_energy_kwh: f64,
    /// Whether charging during peak hours is allowed at all.
    pub allow_peak_hours: bool,
    /// Hours of day (0–23) considered peak.
    pub peak_hours: BTreeSet<u8>,
}

/// Environmental inputs supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyEnv {
    pub current_price: f64,
    /// Hour of day, 0–23.
    pub hour: u8,
}

/// What the station should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Charge,
    Wait,
    Pause,
}

/// A policy verdict with its human-readable justification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub action: PolicyAction,
    pub reason: String,
}

/// Evaluate whether a station should charge, wait, or pause.
pub fn evaluate(
    state: &PolicyStationState,
    profile: &PolicyProfile,
    env: &PolicyEnv,
) -> PolicyDecision {
    if state.energy_dispensed_kwh >= profile.max_energy_kwh {
        return PolicyDecision {
            action: PolicyAction::Pause,
            reason: format!(
                "Energy cap reached ({:.1}/{:.1} kWh)",
                state.energy_dispensed_kwh, profile.max_energy_kwh
            ),
        };
    }

    if env.current_price > profile.charge_if_price_below {
        return PolicyDecision {
            action: PolicyAction::Wait,
            reason: format!(
                "Price too high ({:.2} > {:.2})",
                env.current_price, profile.charge_if_price_below
            ),
        };
    }

    if profile.peak_hours.contains(&env.hour) && !profile.allow_peak_hours {
        return PolicyDecision {
            action: PolicyAction::Wait,
            reason: format!("Peak hour block (hour {})", env.hour),
        };
    }

    PolicyDecision {
        action: PolicyAction::Charge,
        reason: "Conditions OK".to_string(),
    }
}

/// What the meter loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeterAction {
    Continue,
    Stop,
}

/// A meter-tick verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterDecision {
    pub action: MeterAction,
    pub reason: String,
}

/// Refined per-tick check during an active transaction. The energy cap is
/// tested in Wh to match meter granularity; the base policy result maps
/// charge → continue, wait/pause → stop.
pub fn evaluate_meter_tick(
    state: &PolicyStationState,
    profile: &PolicyProfile,
    env: &PolicyEnv,
    current_energy_wh: f64,
    max_energy_wh: f64,
) -> MeterDecision {
    if current_energy_wh >= max_energy_wh {
        return MeterDecision {
            action: MeterAction::Stop,
            reason: format!(
                "Energy cap reached ({:.1}/{:.1} kWh)",
                current_energy_wh / 1000.0,
                max_energy_wh / 1000.0
            ),
        };
    }

    let base = evaluate(state, profile, env);
    match base.action {
        PolicyAction::Charge => MeterDecision {
            action: MeterAction::Continue,
            reason: base.reason,
        },
        PolicyAction::Wait | PolicyAction::Pause => MeterDecision {
            action: MeterAction::Stop,
            reason: base.reason,
        },
    }
}
