//! OCPP 1.6 smart-charging profile manager.
//!
//! One manager per station. Stores profiles per connector (connector 0 is
//! station-wide), resolves stacking, and answers two questions: what is the
//! instantaneous power cap right now, and what does the merged limit look
//! like over a window (composite schedule).
//!
//! Resolution rules:
//! - a profile applies at instant `t` if `validFrom ≤ t ≤ validTo` (when
//!   set), its connector matches or is 0, and its purpose matches the
//!   transaction context;
//! - within a purpose the lowest `stackLevel` that yields a limit wins;
//! - the effective limit is the minimum across the purposes' winners;
//! - ampere limits convert to watts at the station's declared voltage
//!   (nominal 230 V) times the period's phase count (default 3).

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use swarm_types::v16j::{
    ChargingProfile, ChargingProfileKind, ChargingProfilePurpose, ChargingRateUnit,
    ChargingSchedulePeriod, RecurrencyKind,
};
use swarm_types::{OcppError, OcppResult};
use tracing::debug;

/// Nominal single-phase voltage used for A→W conversion.
pub const NOMINAL_VOLTAGE_V: f64 = 230.0;

const DEFAULT_PHASES: i32 = 3;
const DAY_SECS: i64 = 86_400;
const WEEK_SECS: i64 = 604_800;

/// Transaction context the owning agent passes in on reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChargingContext {
    /// Active transaction, if any. Gates TxProfile and TxDefaultProfile.
    pub transaction_id: Option<i32>,
    /// Start of the active transaction; anchor for Relative profiles.
    pub transaction_start: Option<DateTime<Utc>>,
}

/// AND-combined removal filter for [`ProfileManager::clear_profiles`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClearFilter {
    pub profile_id: Option<i32>,
    pub connector_id: Option<u32>,
    pub purpose: Option<ChargingProfilePurpose>,
    pub stack_level: Option<i32>,
}

impl ClearFilter {
    pub fn by_id(profile_id: i32) -> Self {
        Self {
            profile_id: Some(profile_id),
            ..Default::default()
        }
    }

    fn matches(&self, connector: u32, profile: &ChargingProfile) -> bool {
        if let Some(id) = self.profile_id {
            if profile.charging_profile_id != id {
                return false;
            }
        }
        if let Some(conn) = self.connector_id {
            if connector != conn {
                return false;
            }
        }
        if let Some(purpose) = self.purpose {
            if profile.charging_profile_purpose != purpose {
                return false;
            }
        }
        if let Some(level) = self.stack_level {
            if profile.stack_level != level {
                return false;
            }
        }
        true
    }
}

struct StoredProfile {
    profile: ChargingProfile,
    /// Anchor fallback for Absolute profiles without `startSchedule`.
    installed_at: DateTime<Utc>,
}

/// Per-station profile store. Single writer (the owning agent's tasks);
/// reads from the meter loop take the shared lock.
pub struct ProfileManager {
    voltage_v: f64,
    store: RwLock<HashMap<u32, Vec<StoredProfile>>>,
}

impl Default for ProfileManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileManager {
    pub fn new() -> Self {
        Self::with_voltage(NOMINAL_VOLTAGE_V)
    }

    /// A station whose declared voltage differs from nominal.
    pub fn with_voltage(voltage_v: f64) -> Self {
        Self {
            voltage_v,
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Validate and store a profile. A profile with the same id, or one at
    /// the same `(purpose, stackLevel)` slot on the connector, is replaced.
    pub fn set_profile(
        &self,
        connector_id: u32,
        profile: ChargingProfile,
        now: DateTime<Utc>,
    ) -> OcppResult<()> {
        validate_profile(&profile)?;

        let mut store = self.store.write().unwrap();
        let slot = store.entry(connector_id).or_default();

        slot.retain(|stored| {
            stored.profile.charging_profile_id != profile.charging_profile_id
                && !(stored.profile.charging_profile_purpose == profile.charging_profile_purpose
                    && stored.profile.stack_level == profile.stack_level)
        });

        debug!(
            "profile {} stored on connector {connector_id} (purpose={}, stackLevel={})",
            profile.charging_profile_id,
            profile.charging_profile_purpose,
            profile.stack_level
        );
        slot.push(StoredProfile {
            profile,
            installed_at: now,
        });
        Ok(())
    }

    /// Remove every profile matching the filter. Returns the removal count;
    /// zero maps to the `Unknown` wire status.
    pub fn clear_profiles(&self, filter: &ClearFilter) -> usize {
        let mut store = self.store.write().unwrap();
        let mut removed = 0;
        for (connector, slot) in store.iter_mut() {
            let before = slot.len();
            slot.retain(|stored| !filter.matches(*connector, &stored.profile));
            removed += before - slot.len();
        }
        store.retain(|_, slot| !slot.is_empty());
        if removed > 0 {
            debug!("cleared {removed} profiles ({filter:?})");
        }
        removed
    }

    /// The effective instantaneous cap in watts, or `None` when no profile
    /// applies and the station falls back to its policy engine.
    pub fn current_limit(
        &self,
        connector_id: u32,
        ctx: &ChargingContext,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let store = self.store.read().unwrap();
        let candidates = collect_candidates(&store, connector_id);
        self.merged_limit_at(&candidates, ctx, now)
    }

    /// The merged step function over `[now, now + duration)`, in the
    /// requested unit. Empty when nothing applies anywhere in the window.
    pub fn composite_schedule(
        &self,
        connector_id: u32,
        duration_secs: u32,
        unit: ChargingRateUnit,
        ctx: &ChargingContext,
        now: DateTime<Utc>,
    ) -> Vec<ChargingSchedulePeriod> {
        let store = self.store.read().unwrap();
        let candidates = collect_candidates(&store, connector_id);
        if candidates.is_empty() || duration_secs == 0 {
            return Vec::new();
        }

        let mut breakpoints = self.window_breakpoints(&candidates, ctx, now, duration_secs);
        breakpoints.sort_unstable();
        breakpoints.dedup();

        let mut periods: Vec<ChargingSchedulePeriod> = Vec::new();
        let mut last_limit: Option<f64> = None;
        for offset in breakpoints {
            let t = now + ChronoDuration::seconds(offset as i64);
            let limit_w = self.merged_limit_at(&candidates, ctx, t);
            if limit_w == last_limit {
                continue;
            }
            if let Some(watts) = limit_w {
                let limit = match unit {
                    ChargingRateUnit::W => watts,
                    ChargingRateUnit::A => {
                        watts / (self.voltage_v * f64::from(DEFAULT_PHASES))
                    }
                };
                periods.push(ChargingSchedulePeriod {
                    start_period: offset as i32,
                    limit,
                    number_phases: None,
                });
            }
            // A None run is a gap: the next Some starts a new period.
            last_limit = limit_w;
        }
        periods
    }

    /// Copies of the stored profiles for one connector (introspection).
    pub fn profiles_for(&self, connector_id: u32) -> Vec<ChargingProfile> {
        self.store
            .read()
            .unwrap()
            .get(&connector_id)
            .map(|slot| slot.iter().map(|s| s.profile.clone()).collect())
            .unwrap_or_default()
    }

    /// Total number of stored profiles.
    pub fn profile_count(&self) -> usize {
        self.store.read().unwrap().values().map(Vec::len).sum()
    }

    fn merged_limit_at(
        &self,
        candidates: &[(u32, ChargingProfile, DateTime<Utc>)],
        ctx: &ChargingContext,
        t: DateTime<Utc>,
    ) -> Option<f64> {
        let mut effective: Option<f64> = None;
        for purpose in [
            ChargingProfilePurpose::TxProfile,
            ChargingProfilePurpose::TxDefaultProfile,
            ChargingProfilePurpose::ChargePointMaxProfile,
        ] {
            let mut of_purpose: Vec<&(u32, ChargingProfile, DateTime<Utc>)> = candidates
                .iter()
                .filter(|(_, p, _)| {
                    p.charging_profile_purpose == purpose && applies_at(p, ctx, t)
                })
                .collect();
            of_purpose.sort_by_key(|(_, p, _)| p.stack_level);

            // Lower stack level wins; the first profile that yields a limit
            // at `t` is the purpose winner.
            for (_, profile, installed_at) in of_purpose {
                if let Some(watts) = self.limit_at(profile, *installed_at, ctx, t) {
                    effective = Some(match effective {
                        Some(current) => current.min(watts),
                        None => watts,
                    });
                    break;
                }
            }
        }
        effective
    }

    /// Limit of one profile at instant `t`, converted to watts.
    fn limit_at(
        &self,
        profile: &ChargingProfile,
        installed_at: DateTime<Utc>,
        ctx: &ChargingContext,
        t: DateTime<Utc>,
    ) -> Option<f64> {
        let anchor = schedule_anchor(profile, installed_at, ctx, t)?;
        let elapsed = (t - anchor).num_seconds();
        if elapsed < 0 {
            return None;
        }
        let schedule = &profile.charging_schedule;
        if let Some(duration) = schedule.duration {
            if elapsed > i64::from(duration) {
                return None;
            }
        }

        let mut active: Option<&ChargingSchedulePeriod> = None;
        for period in &schedule.charging_schedule_period {
            if i64::from(period.start_period) <= elapsed {
                active = Some(period);
            } else {
                break;
            }
        }
        let period = active?;

        Some(match schedule.charging_rate_unit {
            ChargingRateUnit::W => period.limit,
            ChargingRateUnit::A => {
                let phases = period.number_phases.unwrap_or(DEFAULT_PHASES);
                period.limit * self.voltage_v * f64::from(phases)
            }
        })
    }

    /// All offsets in `[0, duration)` where the merged limit may change.
    fn window_breakpoints(
        &self,
        candidates: &[(u32, ChargingProfile, DateTime<Utc>)],
        ctx: &ChargingContext,
        now: DateTime<Utc>,
        duration_secs: u32,
    ) -> Vec<u32> {
        let duration = i64::from(duration_secs);
        let mut offsets = vec![0u32];
        let mut push = |instant: DateTime<Utc>| {
            let offset = (instant - now).num_seconds();
            if offset > 0 && offset < duration {
                offsets.push(offset as u32);
            }
        };

        for (_, profile, installed_at) in candidates {
            if let Some(from) = profile.valid_from {
                push(from);
            }
            if let Some(to) = profile.valid_to {
                push(to);
            }
            let Some(anchor) = schedule_anchor(profile, *installed_at, ctx, now) else {
                continue;
            };
            let schedule = &profile.charging_schedule;

            let span = match (profile.charging_profile_kind, profile.recurrency_kind) {
                (ChargingProfileKind::Recurring, Some(RecurrencyKind::Daily)) => Some(DAY_SECS),
                (ChargingProfileKind::Recurring, Some(RecurrencyKind::Weekly)) => Some(WEEK_SECS),
                _ => None,
            };
            let occurrences = match span {
                Some(span) => (duration / span) + 2,
                None => 1,
            };

            for k in 0..occurrences {
                let base = anchor + ChronoDuration::seconds(k * span.unwrap_or(0));
                push(base);
                for period in &schedule.charging_schedule_period {
                    push(base + ChronoDuration::seconds(i64::from(period.start_period)));
                }
                if let Some(sched_duration) = schedule.duration {
                    push(base + ChronoDuration::seconds(i64::from(sched_duration)));
                }
            }
        }
        offsets
    }
}

/// Gather profiles stored on the connector itself plus station-wide ones.
fn collect_candidates(
    store: &HashMap<u32, Vec<StoredProfile>>,
    connector_id: u32,
) -> Vec<(u32, ChargingProfile, DateTime<Utc>)> {
    let mut out = Vec::new();
    if let Some(slot) = store.get(&0) {
        out.extend(slot.iter().map(|s| (0, s.profile.clone(), s.installed_at)));
    }
    if connector_id != 0 {
        if let Some(slot) = store.get(&connector_id) {
            out.extend(
                slot.iter()
                    .map(|s| (connector_id, s.profile.clone(), s.installed_at)),
            );
        }
    }
    out
}

/// Purpose/validity applicability at instant `t`. Schedule timing is checked
/// separately by `limit_at`.
fn applies_at(profile: &ChargingProfile, ctx: &ChargingContext, t: DateTime<Utc>) -> bool {
    if let Some(from) = profile.valid_from {
        if t < from {
            return false;
        }
    }
    if let Some(to) = profile.valid_to {
        if t > to {
            return false;
        }
    }
    match profile.charging_profile_purpose {
        ChargingProfilePurpose::ChargePointMaxProfile => true,
        ChargingProfilePurpose::TxDefaultProfile => ctx.transaction_id.is_some(),
        ChargingProfilePurpose::TxProfile => {
            profile.transaction_id.is_some() && profile.transaction_id == ctx.transaction_id
        }
    }
}

/// Effective schedule start for a profile at reference instant `t`.
fn schedule_anchor(
    profile: &ChargingProfile,
    installed_at: DateTime<Utc>,
    ctx: &ChargingContext,
    t: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match profile.charging_profile_kind {
        ChargingProfileKind::Absolute => Some(
            profile
                .charging_schedule
                .start_schedule
                .unwrap_or(installed_at),
        ),
        ChargingProfileKind::Recurring => {
            let midnight = t.date_naive().and_hms_opt(0, 0, 0)?.and_utc();
            match profile.recurrency_kind {
                Some(RecurrencyKind::Daily) => Some(midnight),
                Some(RecurrencyKind::Weekly) => {
                    let back = i64::from(t.weekday().num_days_from_monday());
                    Some(midnight - ChronoDuration::days(back))
                }
                None => None,
            }
        }
        ChargingProfileKind::Relative => ctx.transaction_start,
    }
}

/// Structural validation per OCPP 1.6. Failure leaves the store unchanged
/// and maps to the `Rejected` wire status.
fn validate_profile(profile: &ChargingProfile) -> OcppResult<()> {
    if profile.charging_profile_id <= 0 {
        return Err(OcppError::Validation {
            message: format!(
                "chargingProfileId must be positive, got {}",
                profile.charging_profile_id
            ),
        });
    }
    if profile.stack_level < 0 {
        return Err(OcppError::Validation {
            message: format!("stackLevel must be non-negative, got {}", profile.stack_level),
        });
    }

    let periods = &profile.charging_schedule.charging_schedule_period;
    if periods.is_empty() {
        return Err(OcppError::Validation {
            message: "chargingSchedulePeriod must not be empty".to_string(),
        });
    }
    if periods[0].start_period < 0 {
        return Err(OcppError::Validation {
            message: format!(
                "startPeriod must be non-negative, got {}",
                periods[0].start_period
            ),
        });
    }
    for pair in periods.windows(2) {
        if pair[1].start_period <= pair[0].start_period {
            return Err(OcppError::Validation {
                message: format!(
                    "startPeriod must be strictly increasing ({} then {})",
                    pair[0].start_period, pair[1].start_period
                ),
            });
        }
    }
    for (i, period) in periods.iter().enumerate() {
        if period.limit <= 0.0 {
            return Err(OcppError::Validation {
                message: format!("period {i} has non-positive limit {}", period.limit),
            });
        }
    }

    match profile.charging_profile_purpose {
        ChargingProfilePurpose::TxProfile => {
            if profile.transaction_id.is_none() {
                return Err(OcppError::Validation {
                    message: "transactionId is required for TxProfile".to_string(),
                });
            }
        }
        _ => {
            if profile.transaction_id.is_some() {
                return Err(OcppError::Validation {
                    message: "transactionId is only allowed for TxProfile".to_string(),
                });
            }
        }
    }

    if profile.charging_profile_kind == ChargingProfileKind::Recurring
        && profile.recurrency_kind.is_none()
    {
        return Err(OcppError::Validation {
            message: "recurrencyKind is required for Recurring profiles".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use swarm_types::v16j::ChargingSchedule;

    fn t0() -> DateTime<Utc> {
        // A Wednesday, 12:00 UTC.
        Utc.with_ymd_and_hms(2025, 6, 4, 12, 0, 0).unwrap()
    }

    fn profile(
        id: i32,
        purpose: ChargingProfilePurpose,
        stack_level: i32,
        periods: Vec<(i32, f64)>,
    ) -> ChargingProfile {
        ChargingProfile {
            charging_profile_id: id,
            transaction_id: if purpose == ChargingProfilePurpose::TxProfile {
                Some(777)
            } else {
                None
            },
            stack_level,
            charging_profile_purpose: purpose,
            charging_profile_kind: ChargingProfileKind::Absolute,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule {
                duration: None,
                start_schedule: Some(t0()),
                charging_rate_unit: ChargingRateUnit::W,
                charging_schedule_period: periods
                    .into_iter()
                    .map(|(start, limit)| ChargingSchedulePeriod {
                        start_period: start,
                        limit,
                        number_phases: None,
                    })
                    .collect(),
                min_charging_rate: None,
            },
        }
    }

    fn tx_ctx() -> ChargingContext {
        ChargingContext {
            transaction_id: Some(777),
            transaction_start: Some(t0()),
        }
    }

    #[test]
    fn no_profiles_means_no_limit() {
        let mgr = ProfileManager::new();
        assert_eq!(mgr.current_limit(1, &ChargingContext::default(), t0()), None);
    }

    #[test]
    fn charge_point_max_applies_without_transaction() {
        let mgr = ProfileManager::new();
        mgr.set_profile(
            0,
            profile(
                1,
                ChargingProfilePurpose::ChargePointMaxProfile,
                0,
                vec![(0, 7400.0)],
            ),
            t0(),
        )
        .unwrap();

        let limit = mgr.current_limit(1, &ChargingContext::default(), t0());
        assert_eq!(limit, Some(7400.0));
    }

    #[test]
    fn tx_default_requires_active_transaction() {
        let mgr = ProfileManager::new();
        mgr.set_profile(
            1,
            profile(
                2,
                ChargingProfilePurpose::TxDefaultProfile,
                0,
                vec![(0, 11000.0)],
            ),
            t0(),
        )
        .unwrap();

        assert_eq!(mgr.current_limit(1, &ChargingContext::default(), t0()), None);
        assert_eq!(mgr.current_limit(1, &tx_ctx(), t0()), Some(11000.0));
    }

    #[test]
    fn tx_profile_gates_on_transaction_id() {
        let mgr = ProfileManager::new();
        mgr.set_profile(
            1,
            profile(3, ChargingProfilePurpose::TxProfile, 0, vec![(0, 7400.0)]),
            t0(),
        )
        .unwrap();

        assert_eq!(mgr.current_limit(1, &tx_ctx(), t0()), Some(7400.0));

        let other_tx = ChargingContext {
            transaction_id: Some(888),
            transaction_start: Some(t0()),
        };
        assert_eq!(mgr.current_limit(1, &other_tx, t0()), None);
    }

    #[test]
    fn stacked_precedence_tx_profile_wins_then_reverts() {
        // TxDefault 22 kW plus a TxProfile 7.4 kW for the active
        // transaction; the TxProfile wins while the transaction runs.
        let mgr = ProfileManager::new();
        mgr.set_profile(
            1,
            profile(
                10,
                ChargingProfilePurpose::TxDefaultProfile,
                0,
                vec![(0, 22000.0)],
            ),
            t0(),
        )
        .unwrap();
        mgr.set_profile(
            1,
            profile(11, ChargingProfilePurpose::TxProfile, 0, vec![(0, 7400.0)]),
            t0(),
        )
        .unwrap();

        assert_eq!(mgr.current_limit(1, &tx_ctx(), t0()), Some(7400.0));

        // Transaction over: TxProfile no longer applies, TxDefault needs a
        // transaction too, so a fresh one sees only the default again.
        let next_tx = ChargingContext {
            transaction_id: Some(999),
            transaction_start: Some(t0()),
        };
        assert_eq!(mgr.current_limit(1, &next_tx, t0()), Some(22000.0));

        // Clearing by purpose removes the default but not the TxProfile.
        let removed = mgr.clear_profiles(&ClearFilter {
            purpose: Some(ChargingProfilePurpose::TxDefaultProfile),
            ..Default::default()
        });
        assert_eq!(removed, 1);
        assert_eq!(mgr.profiles_for(1).len(), 1);
    }

    #[test]
    fn lower_stack_level_wins_within_purpose() {
        let mgr = ProfileManager::new();
        mgr.set_profile(
            1,
            profile(
                20,
                ChargingProfilePurpose::TxDefaultProfile,
                5,
                vec![(0, 5000.0)],
            ),
            t0(),
        )
        .unwrap();
        mgr.set_profile(
            1,
            profile(
                21,
                ChargingProfilePurpose::TxDefaultProfile,
                0,
                vec![(0, 9000.0)],
            ),
            t0(),
        )
        .unwrap();

        // Stack 0 wins even though stack 5 has the lower limit.
        assert_eq!(mgr.current_limit(1, &tx_ctx(), t0()), Some(9000.0));
    }

    #[test]
    fn same_slot_profile_replaces() {
        let mgr = ProfileManager::new();
        mgr.set_profile(
            0,
            profile(
                1,
                ChargingProfilePurpose::ChargePointMaxProfile,
                0,
                vec![(0, 22000.0)],
            ),
            t0(),
        )
        .unwrap();
        mgr.set_profile(
            0,
            profile(
                2,
                ChargingProfilePurpose::ChargePointMaxProfile,
                0,
                vec![(0, 7400.0)],
            ),
            t0(),
        )
        .unwrap();

        // Invariant: one stored profile per (purpose, stackLevel, connector).
        assert_eq!(mgr.profile_count(), 1);
        assert_eq!(
            mgr.current_limit(1, &ChargingContext::default(), t0()),
            Some(7400.0)
        );
    }

    #[test]
    fn set_then_clear_reverts_limit() {
        let mgr = ProfileManager::new();
        let before = mgr.current_limit(1, &ChargingContext::default(), t0());

        mgr.set_profile(
            0,
            profile(
                42,
                ChargingProfilePurpose::ChargePointMaxProfile,
                0,
                vec![(0, 7400.0)],
            ),
            t0(),
        )
        .unwrap();
        assert_eq!(
            mgr.current_limit(1, &ChargingContext::default(), t0()),
            Some(7400.0)
        );

        assert_eq!(mgr.clear_profiles(&ClearFilter::by_id(42)), 1);
        assert_eq!(mgr.current_limit(1, &ChargingContext::default(), t0()), before);
    }

    #[test]
    fn clear_filters_combine_with_and() {
        let mgr = ProfileManager::new();
        mgr.set_profile(
            1,
            profile(
                1,
                ChargingProfilePurpose::TxDefaultProfile,
                0,
                vec![(0, 11000.0)],
            ),
            t0(),
        )
        .unwrap();
        mgr.set_profile(
            2,
            profile(
                2,
                ChargingProfilePurpose::TxDefaultProfile,
                1,
                vec![(0, 11000.0)],
            ),
            t0(),
        )
        .unwrap();

        // Purpose matches both, connector narrows to one.
        let removed = mgr.clear_profiles(&ClearFilter {
            purpose: Some(ChargingProfilePurpose::TxDefaultProfile),
            connector_id: Some(2),
            ..Default::default()
        });
        assert_eq!(removed, 1);
        assert_eq!(mgr.profiles_for(1).len(), 1);
        assert_eq!(mgr.profiles_for(2).len(), 0);

        // Nothing matches: count 0 maps to Unknown.
        assert_eq!(mgr.clear_profiles(&ClearFilter::by_id(999)), 0);
    }

    #[test]
    fn period_selection_within_schedule() {
        let mgr = ProfileManager::new();
        mgr.set_profile(
            0,
            profile(
                1,
                ChargingProfilePurpose::ChargePointMaxProfile,
                0,
                vec![(0, 11000.0), (3600, 7400.0)],
            ),
            t0(),
        )
        .unwrap();

        let ctx = ChargingContext::default();
        assert_eq!(mgr.current_limit(1, &ctx, t0()), Some(11000.0));
        assert_eq!(
            mgr.current_limit(1, &ctx, t0() + ChronoDuration::seconds(3599)),
            Some(11000.0)
        );
        assert_eq!(
            mgr.current_limit(1, &ctx, t0() + ChronoDuration::seconds(3600)),
            Some(7400.0)
        );
    }

    #[test]
    fn schedule_duration_expires() {
        let mut p = profile(
            1,
            ChargingProfilePurpose::ChargePointMaxProfile,
            0,
            vec![(0, 7400.0)],
        );
        p.charging_schedule.duration = Some(7200);

        let mgr = ProfileManager::new();
        mgr.set_profile(0, p, t0()).unwrap();

        let ctx = ChargingContext::default();
        assert_eq!(
            mgr.current_limit(1, &ctx, t0() + ChronoDuration::seconds(7200)),
            Some(7400.0)
        );
        assert_eq!(
            mgr.current_limit(1, &ctx, t0() + ChronoDuration::seconds(7201)),
            None
        );
    }

    #[test]
    fn valid_to_expires_profile() {
        let mut p = profile(
            1,
            ChargingProfilePurpose::ChargePointMaxProfile,
            0,
            vec![(0, 7400.0)],
        );
        p.valid_to = Some(t0() + ChronoDuration::seconds(60));

        let mgr = ProfileManager::new();
        mgr.set_profile(0, p, t0()).unwrap();

        let ctx = ChargingContext::default();
        assert!(mgr.current_limit(1, &ctx, t0()).is_some());
        assert_eq!(
            mgr.current_limit(1, &ctx, t0() + ChronoDuration::seconds(61)),
            None
        );
    }

    #[test]
    fn ampere_limits_convert_to_watts() {
        let mut p = profile(
            1,
            ChargingProfilePurpose::ChargePointMaxProfile,
            0,
            vec![(0, 16.0)],
        );
        p.charging_schedule.charging_rate_unit = ChargingRateUnit::A;
        p.charging_schedule.charging_schedule_period[0].number_phases = Some(1);

        let mgr = ProfileManager::new();
        mgr.set_profile(0, p, t0()).unwrap();
        assert_eq!(
            mgr.current_limit(1, &ChargingContext::default(), t0()),
            Some(16.0 * 230.0)
        );

        // Default phase count is 3 when the period does not say.
        let mut p3 = profile(
            2,
            ChargingProfilePurpose::TxDefaultProfile,
            0,
            vec![(0, 16.0)],
        );
        p3.charging_schedule.charging_rate_unit = ChargingRateUnit::A;
        mgr.set_profile(1, p3, t0()).unwrap();
        assert_eq!(
            mgr.current_limit(1, &tx_ctx(), t0()),
            Some(16.0 * 230.0) // ChargePointMax at 1 phase still the minimum
        );

        // Declared station voltage overrides nominal.
        let mgr_110 = ProfileManager::with_voltage(110.0);
        let mut p110 = profile(
            3,
            ChargingProfilePurpose::ChargePointMaxProfile,
            0,
            vec![(0, 10.0)],
        );
        p110.charging_schedule.charging_rate_unit = ChargingRateUnit::A;
        p110.charging_schedule.charging_schedule_period[0].number_phases = Some(1);
        mgr_110.set_profile(0, p110, t0()).unwrap();
        assert_eq!(
            mgr_110.current_limit(1, &ChargingContext::default(), t0()),
            Some(1100.0)
        );
    }

    #[test]
    fn relative_profile_anchors_on_transaction_start() {
        let mut p = profile(1, ChargingProfilePurpose::TxProfile, 0, vec![(0, 7400.0)]);
        p.charging_profile_kind = ChargingProfileKind::Relative;
        p.charging_schedule.start_schedule = None;

        let mgr = ProfileManager::new();
        mgr.set_profile(1, p, t0()).unwrap();

        // Without a transaction start there is no anchor.
        let no_start = ChargingContext {
            transaction_id: Some(777),
            transaction_start: None,
        };
        assert_eq!(mgr.current_limit(1, &no_start, t0()), None);
        assert_eq!(mgr.current_limit(1, &tx_ctx(), t0()), Some(7400.0));
    }

    #[test]
    fn daily_recurring_uses_midnight_anchor() {
        // 7 kW between 08:00 and 18:00, 11 kW otherwise, repeating daily.
        let mut p = profile(
            1,
            ChargingProfilePurpose::TxDefaultProfile,
            0,
            vec![(0, 11000.0), (8 * 3600, 7000.0), (18 * 3600, 11000.0)],
        );
        p.charging_profile_kind = ChargingProfileKind::Recurring;
        p.recurrency_kind = Some(RecurrencyKind::Daily);

        let mgr = ProfileManager::new();
        mgr.set_profile(1, p, t0()).unwrap();

        let at = |h: u32| Utc.with_ymd_and_hms(2025, 6, 4, h, 30, 0).unwrap();
        assert_eq!(mgr.current_limit(1, &tx_ctx(), at(6)), Some(11000.0));
        assert_eq!(mgr.current_limit(1, &tx_ctx(), at(12)), Some(7000.0));
        assert_eq!(mgr.current_limit(1, &tx_ctx(), at(20)), Some(11000.0));

        // Next day, same shape.
        let next_day = Utc.with_ymd_and_hms(2025, 6, 5, 12, 30, 0).unwrap();
        assert_eq!(mgr.current_limit(1, &tx_ctx(), next_day), Some(7000.0));
    }

    #[test]
    fn weekly_recurring_anchors_on_monday() {
        // 5 kW for the first 24 h of each week (Monday).
        let mut p = profile(
            1,
            ChargingProfilePurpose::ChargePointMaxProfile,
            0,
            vec![(0, 5000.0)],
        );
        p.charging_profile_kind = ChargingProfileKind::Recurring;
        p.recurrency_kind = Some(RecurrencyKind::Weekly);
        p.charging_schedule.duration = Some(86_400);

        let mgr = ProfileManager::new();
        mgr.set_profile(0, p, t0()).unwrap();

        let ctx = ChargingContext::default();
        // Monday of that week is 2025-06-02.
        let monday_noon = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        assert_eq!(mgr.current_limit(1, &ctx, monday_noon), Some(5000.0));
        // Wednesday: more than 24 h into the week, schedule expired.
        assert_eq!(mgr.current_limit(1, &ctx, t0()), None);
    }

    #[test]
    fn composite_schedule_single_profile() {
        let mgr = ProfileManager::new();
        mgr.set_profile(
            0,
            profile(
                1,
                ChargingProfilePurpose::ChargePointMaxProfile,
                0,
                vec![(0, 7400.0)],
            ),
            t0(),
        )
        .unwrap();

        let periods = mgr.composite_schedule(
            1,
            3600,
            ChargingRateUnit::W,
            &ChargingContext::default(),
            t0(),
        );
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].start_period, 0);
        assert_eq!(periods[0].limit, 7400.0);
    }

    #[test]
    fn composite_schedule_merges_and_collapses() {
        let mgr = ProfileManager::new();
        // Station-wide 22 kW cap, and a default profile dropping to 7 kW
        // after the first hour.
        mgr.set_profile(
            0,
            profile(
                1,
                ChargingProfilePurpose::ChargePointMaxProfile,
                0,
                vec![(0, 22000.0)],
            ),
            t0(),
        )
        .unwrap();
        mgr.set_profile(
            1,
            profile(
                2,
                ChargingProfilePurpose::TxDefaultProfile,
                0,
                vec![(0, 11000.0), (3600, 7000.0)],
            ),
            t0(),
        )
        .unwrap();

        let periods = mgr.composite_schedule(1, 7200, ChargingRateUnit::W, &tx_ctx(), t0());
        assert_eq!(
            periods
                .iter()
                .map(|p| (p.start_period, p.limit))
                .collect::<Vec<_>>(),
            vec![(0, 11000.0), (3600, 7000.0)]
        );
    }

    #[test]
    fn composite_schedule_is_idempotent() {
        let mgr = ProfileManager::new();
        mgr.set_profile(
            0,
            profile(
                1,
                ChargingProfilePurpose::ChargePointMaxProfile,
                0,
                vec![(0, 11000.0), (1800, 7400.0)],
            ),
            t0(),
        )
        .unwrap();

        let ctx = ChargingContext::default();
        let first = mgr.composite_schedule(1, 3600, ChargingRateUnit::W, &ctx, t0());
        let second = mgr.composite_schedule(1, 3600, ChargingRateUnit::W, &ctx, t0());
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn composite_schedule_empty_when_nothing_applies() {
        let mgr = ProfileManager::new();
        assert!(mgr
            .composite_schedule(
                1,
                3600,
                ChargingRateUnit::W,
                &ChargingContext::default(),
                t0()
            )
            .is_empty());
    }

    #[test]
    fn composite_schedule_includes_valid_to_breakpoint() {
        let mut p = profile(
            1,
            ChargingProfilePurpose::ChargePointMaxProfile,
            0,
            vec![(0, 7400.0)],
        );
        p.valid_to = Some(t0() + ChronoDuration::seconds(1800));

        let mgr = ProfileManager::new();
        mgr.set_profile(0, p, t0()).unwrap();

        let periods = mgr.composite_schedule(
            1,
            3600,
            ChargingRateUnit::W,
            &ChargingContext::default(),
            t0(),
        );
        // One covered segment that ends at the validity edge.
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].start_period, 0);
    }

    #[test]
    fn validation_rejects_bad_profiles() {
        let mgr = ProfileManager::new();

        // Empty period array.
        let mut p = profile(1, ChargingProfilePurpose::ChargePointMaxProfile, 0, vec![]);
        p.charging_schedule.charging_schedule_period.clear();
        assert!(mgr.set_profile(0, p, t0()).is_err());

        // Out-of-order periods.
        let p = profile(
            1,
            ChargingProfilePurpose::ChargePointMaxProfile,
            0,
            vec![(100, 5000.0), (50, 4000.0)],
        );
        assert!(mgr.set_profile(0, p, t0()).is_err());

        // Duplicate startPeriod is not strictly increasing either.
        let p = profile(
            1,
            ChargingProfilePurpose::ChargePointMaxProfile,
            0,
            vec![(0, 5000.0), (0, 4000.0)],
        );
        assert!(mgr.set_profile(0, p, t0()).is_err());

        // TxProfile without a transaction id.
        let mut p = profile(1, ChargingProfilePurpose::TxProfile, 0, vec![(0, 5000.0)]);
        p.transaction_id = None;
        assert!(mgr.set_profile(1, p, t0()).is_err());

        // transactionId on a non-Tx profile.
        let mut p = profile(
            1,
            ChargingProfilePurpose::ChargePointMaxProfile,
            0,
            vec![(0, 5000.0)],
        );
        p.transaction_id = Some(5);
        assert!(mgr.set_profile(0, p, t0()).is_err());

        // Recurring without recurrencyKind.
        let mut p = profile(
            1,
            ChargingProfilePurpose::ChargePointMaxProfile,
            0,
            vec![(0, 5000.0)],
        );
        p.charging_profile_kind = ChargingProfileKind::Recurring;
        assert!(mgr.set_profile(0, p, t0()).is_err());

        // Non-positive limit.
        let p = profile(
            1,
            ChargingProfilePurpose::ChargePointMaxProfile,
            0,
            vec![(0, 0.0)],
        );
        assert!(mgr.set_profile(0, p, t0()).is_err());

        // Nothing was stored by any of the rejected calls.
        assert_eq!(mgr.profile_count(), 0);
    }

    #[test]
    fn absolute_without_start_schedule_anchors_on_install() {
        let mut p = profile(
            1,
            ChargingProfilePurpose::ChargePointMaxProfile,
            0,
            vec![(0, 7400.0)],
        );
        p.charging_schedule.start_schedule = None;

        let mgr = ProfileManager::new();
        let installed = t0();
        mgr.set_profile(0, p, installed).unwrap();

        let ctx = ChargingContext::default();
        assert_eq!(
            mgr.current_limit(1, &ctx, installed - ChronoDuration::seconds(1)),
            None
        );
        assert_eq!(
            mgr.current_limit(1, &ctx, installed + ChronoDuration::seconds(1)),
            Some(7400.0)
        );
    }
}
