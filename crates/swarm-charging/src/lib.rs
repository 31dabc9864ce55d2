//! # swarm-charging
//!
//! The two decision subsystems of the simulator:
//!
//! - [`policy`]: the pure charge/wait/pause arbitration a station falls back
//!   to when no OCPP profile constrains it.
//! - [`profiles`]: the OCPP 1.6 smart-charging profile store with stacking
//!   resolution, instantaneous limits and composite schedules.
//!
//! [`scenarios`] builds the canonical profiles the CSMS pushes for peak
//! shaving, time-of-use tariffs and per-transaction energy caps.

pub mod policy;
pub mod profiles;
pub mod scenarios;

pub use policy::{
    evaluate, evaluate_meter_tick, MeterAction, MeterDecision, PolicyAction, PolicyDecision,
    PolicyEnv, PolicyProfile, PolicyStationState,
};
pub use profiles::{ChargingContext, ClearFilter, ProfileManager, NOMINAL_VOLTAGE_V};
pub use scenarios::{
    energy_cap_profile, peak_shaving_profile, time_of_use_profile, TestProfileParams,
};
