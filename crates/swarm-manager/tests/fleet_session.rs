//! End-to-end fleet tests: a real CSMS, real station agents, real OCPP
//! sessions over loopback WebSocket.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use swarm_csms::{spawn_server, CsmsConfig, CsmsState};
use swarm_manager::{ManagerConfig, StationManager};
use swarm_station::BehaviorPreset;
use swarm_types::v16j::{ChargingProfileStatus, GetCompositeScheduleStatus};

async fn start_stack(initial_price: f64) -> (Arc<StationManager>, Arc<CsmsState>) {
    let config = CsmsConfig {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        call_timeout_secs: 5,
        ..Default::default()
    };
    let (addr, csms, _task) = spawn_server(config).await.unwrap();

    let manager_config = ManagerConfig {
        csms_base_url: format!("ws://127.0.0.1:{}/ocpp", addr.port()),
        initial_price,
        batch_step_delay_ms: 10,
        ..Default::default()
    };
    let manager = Arc::new(StationManager::new(manager_config, csms.clone()));
    (manager, csms)
}

/// A preset fast enough for integration tests: one-second cadence, a cap
/// that is reached within a few ticks.
fn bench_preset(max_energy_kwh: f64) -> BehaviorPreset {
    BehaviorPreset {
        name: "bench".to_string(),
        heartbeat_interval: 60,
        idle_min: 1,
        idle_max: 1,
        energy_step_min: 400,
        energy_step_max: 600,
        sample_interval_min: 1,
        sample_interval_max: 1,
        enable_transactions: true,
        offline_probability: 0.0,
        offline_duration: 0,
        id_tags: vec!["BENCH01".to_string()],
        charge_if_price_below: 100.0,
        max_energy_kwh,
        allow_peak: true,
        peak_hours: (8..18).collect(),
    }
}

async fn wait_until<F, Fut>(what: &str, deadline: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn has_log(manager: &StationManager, station_id: &str, needle: &str) -> bool {
    manager
        .station_logs(station_id)
        .await
        .map(|logs| logs.iter().any(|l| l.contains(needle)))
        .unwrap_or(false)
}

#[tokio::test]
async fn happy_session_reaches_energy_cap() {
    let (manager, csms) = start_stack(18.0).await;
    manager.register_preset(bench_preset(1.0)).await.unwrap();
    manager.start_station("SWARM-0001", "bench").await.unwrap();

    // The session runs to its 1 kWh cap and stops with that exact meter
    // value (energy saturates at the cap).
    wait_until("completed transaction", Duration::from_secs(30), || async {
        csms.transactions_for("SWARM-0001")
            .iter()
            .any(|t| t.meter_stop == Some(1000))
    })
    .await;

    let logs = manager.station_logs("SWARM-0001").await.unwrap();
    assert!(logs.iter().any(|l| l.contains("BootNotification accepted")));
    assert!(logs.iter().any(|l| l.contains("Charging started")));
    assert!(logs
        .iter()
        .any(|l| l.contains("Charging stopped (1.00 kWh delivered)")));
    assert!(logs.len() <= swarm_station::LOG_CAPACITY);

    let totals = manager.totals().await;
    assert!(totals.total_energy_kwh >= 1.0);
    assert!(totals.total_earnings > 0.0);

    manager.shutdown().await;
}

#[tokio::test]
async fn price_block_prevents_sessions() {
    let (manager, csms) = start_stack(25.0).await;
    let mut preset = bench_preset(1.0);
    preset.charge_if_price_below = 20.0;
    manager.register_preset(preset).await.unwrap();
    manager.start_station("SWARM-0001", "bench").await.unwrap();

    // The agent evaluates after its one-second idle window and logs the
    // block instead of authorizing.
    wait_until("price-block log entry", Duration::from_secs(30), || async {
        has_log(&manager, "SWARM-0001", "Price too high (25.00 > 20.00)").await
    })
    .await;

    // No Authorize, no StartTransaction.
    assert!(csms.transactions_for("SWARM-0001").is_empty());
    let logs = manager.station_logs("SWARM-0001").await.unwrap();
    assert!(!logs.iter().any(|l| l.contains("Charging started")));

    manager.shutdown().await;
}

#[tokio::test]
async fn peak_shaving_profile_round_trip() {
    let (manager, csms) = start_stack(18.0).await;
    // A large cap keeps the session running while we poke at profiles.
    manager.register_preset(bench_preset(500.0)).await.unwrap();
    manager.start_station("SWARM-0001", "bench").await.unwrap();

    wait_until("station connected", Duration::from_secs(15), || async {
        csms.is_connected("SWARM-0001")
    })
    .await;

    // Install a 7.4 kW station-wide ceiling over the OCPP link.
    let (profile_id, status) = csms.send_peak_shaving("SWARM-0001", 7400.0).await.unwrap();
    assert_eq!(profile_id, 1);
    assert_eq!(status, ChargingProfileStatus::Accepted);

    // The composite schedule reports a single 7.4 kW segment.
    let schedule = manager
        .get_composite_schedule("SWARM-0001", 1, 3600, None)
        .await
        .unwrap();
    assert_eq!(schedule.status, GetCompositeScheduleStatus::Accepted);
    let periods = schedule
        .charging_schedule
        .unwrap()
        .charging_schedule_period;
    assert_eq!(periods.len(), 1);
    assert_eq!(periods[0].limit, 7400.0);

    // While capped, the agent logs the per-tick limit enforcement.
    wait_until("OCPP limit log entry", Duration::from_secs(30), || async {
        has_log(&manager, "SWARM-0001", "OCPP limit: 7400W").await
    })
    .await;

    // Clearing by id reverts the station to policy control.
    let cleared = manager
        .clear_charging_profile(
            "SWARM-0001",
            swarm_messages::v16j::ClearChargingProfileRequest {
                id: Some(profile_id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        cleared,
        swarm_types::v16j::ClearChargingProfileStatus::Accepted
    );

    let schedule = manager
        .get_composite_schedule("SWARM-0001", 1, 3600, None)
        .await
        .unwrap();
    assert_eq!(schedule.status, GetCompositeScheduleStatus::Rejected);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_profile_scenario_validation_and_send() {
    let (manager, csms) = start_stack(18.0).await;
    manager.register_preset(bench_preset(500.0)).await.unwrap();
    manager.start_station("SWARM-0001", "bench").await.unwrap();

    wait_until("station connected", Duration::from_secs(15), || async {
        csms.is_connected("SWARM-0001")
    })
    .await;

    // Unknown scenario fails before anything is sent.
    let params: swarm_charging::TestProfileParams =
        serde_json::from_value(serde_json::json!({"scenario": "warp"})).unwrap();
    let err = manager
        .send_test_profile("SWARM-0001", &params)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown scenario"));

    // A valid peak-shaving request lands on the station.
    let params: swarm_charging::TestProfileParams = serde_json::from_value(serde_json::json!({
        "scenario": "peak_shaving",
        "connector_id": 0,
        "max_power_w": 9000.0
    }))
    .unwrap();
    let (profile, status) = manager
        .send_test_profile("SWARM-0001", &params)
        .await
        .unwrap();
    assert_eq!(status, ChargingProfileStatus::Accepted);
    assert_eq!(
        profile.charging_schedule.charging_schedule_period[0].limit,
        9000.0
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn graceful_stop_finishes_transaction() {
    let (manager, csms) = start_stack(18.0).await;
    manager.register_preset(bench_preset(500.0)).await.unwrap();
    manager.start_station("SWARM-0001", "bench").await.unwrap();

    // Wait for an active transaction.
    wait_until("active transaction", Duration::from_secs(30), || async {
        csms.transactions_for("SWARM-0001")
            .iter()
            .any(|t| t.is_active())
    })
    .await;

    manager.stop_station("SWARM-0001").await.unwrap();

    // The in-flight transaction got a StopTransaction before the close.
    wait_until("finalized transaction", Duration::from_secs(10), || async {
        csms.transactions_for("SWARM-0001")
            .iter()
            .all(|t| !t.is_active())
    })
    .await;

    let snapshot = manager.station_snapshot("SWARM-0001").await.unwrap();
    assert!(!snapshot.running);

    manager.shutdown().await;
}
