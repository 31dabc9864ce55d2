//! Session-level integration: a raw OCPP-J client speaking wire frames
//! against a live CSMS over loopback.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use swarm_csms::{spawn_server, CsmsConfig};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;

type Client = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn start_csms(replace_existing: bool) -> (std::net::SocketAddr, std::sync::Arc<swarm_csms::CsmsState>) {
    let config = CsmsConfig {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        blocked_id_tags: vec!["BLOCKED1".to_string()],
        replace_existing,
        call_timeout_secs: 5,
        ..Default::default()
    };
    let (addr, state, _task) = spawn_server(config).await.unwrap();
    (addr, state)
}

async fn connect_station(addr: std::net::SocketAddr, station_id: &str) -> Client {
    let mut request = format!("ws://{addr}/ocpp/{station_id}")
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", "ocpp1.6".parse().unwrap());
    let (stream, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(
        response
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok()),
        Some("ocpp1.6")
    );
    stream
}

async fn send_frame(client: &mut Client, frame: Value) {
    client
        .send(WsMessage::Text(frame.to_string()))
        .await
        .unwrap();
}

async fn next_frame(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("socket error");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn full_session_flow() {
    let (addr, state) = start_csms(false).await;
    let mut client = connect_station(addr, "CP-IT-01").await;

    // Boot.
    send_frame(
        &mut client,
        json!([2, "b1", "BootNotification",
               {"chargePointVendor": "SwarmSim", "chargePointModel": "Virtual-CP"}]),
    )
    .await;
    let reply = next_frame(&mut client).await;
    assert_eq!(reply[0], 3);
    assert_eq!(reply[1], "b1");
    assert_eq!(reply[2]["status"], "Accepted");
    assert_eq!(reply[2]["interval"], 60);

    // Authorize (accepted, then blocked tag).
    send_frame(&mut client, json!([2, "a1", "Authorize", {"idTag": "TAG001"}])).await;
    let reply = next_frame(&mut client).await;
    assert_eq!(reply[2]["idTagInfo"]["status"], "Accepted");

    send_frame(&mut client, json!([2, "a2", "Authorize", {"idTag": "BLOCKED1"}])).await;
    let reply = next_frame(&mut client).await;
    assert_eq!(reply[2]["idTagInfo"]["status"], "Blocked");

    // Transaction.
    send_frame(
        &mut client,
        json!([2, "s1", "StartTransaction",
               {"connectorId": 1, "idTag": "TAG001", "meterStart": 0,
                "timestamp": "2025-06-04T12:00:00Z"}]),
    )
    .await;
    let reply = next_frame(&mut client).await;
    let tx_id = reply[2]["transactionId"].as_i64().unwrap() as i32;
    assert_eq!(tx_id, 1);

    send_frame(
        &mut client,
        json!([2, "m1", "MeterValues",
               {"connectorId": 1, "transactionId": tx_id,
                "meterValue": [{"timestamp": "2025-06-04T12:01:00Z",
                                "sampledValue": [{"value": "1000",
                                                  "measurand": "Energy.Active.Import.Register",
                                                  "unit": "Wh"}]}]}]),
    )
    .await;
    let reply = next_frame(&mut client).await;
    assert_eq!(reply[0], 3);
    assert_eq!(state.transaction(tx_id).unwrap().meter_last, Some(1000));

    send_frame(
        &mut client,
        json!([2, "t1", "StopTransaction",
               {"transactionId": tx_id, "meterStop": 5000,
                "timestamp": "2025-06-04T12:30:00Z", "reason": "Local"}]),
    )
    .await;
    let reply = next_frame(&mut client).await;
    assert_eq!(reply[0], 3);
    let record = state.transaction(tx_id).unwrap();
    assert_eq!(record.meter_stop, Some(5000));
    assert!(!record.is_active());
}

#[tokio::test]
async fn csms_originated_set_charging_profile() {
    let (addr, state) = start_csms(false).await;
    let mut client = connect_station(addr, "CP-IT-02").await;

    // Wait for the registry entry.
    for _ in 0..50 {
        if state.is_connected("CP-IT-02") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(state.is_connected("CP-IT-02"));

    let state_clone = state.clone();
    let op = tokio::spawn(async move {
        state_clone
            .send_peak_shaving("CP-IT-02", 7400.0)
            .await
            .unwrap()
    });

    // The station side sees a SetChargingProfile CALL and accepts it.
    let call = next_frame(&mut client).await;
    assert_eq!(call[0], 2);
    assert_eq!(call[2], "SetChargingProfile");
    assert_eq!(call[3]["connectorId"], 0);
    assert_eq!(
        call[3]["csChargingProfiles"]["chargingProfilePurpose"],
        "ChargePointMaxProfile"
    );
    let unique_id = call[1].as_str().unwrap().to_string();
    send_frame(&mut client, json!([3, unique_id, {"status": "Accepted"}])).await;

    let (profile_id, status) = op.await.unwrap();
    assert_eq!(profile_id, 1);
    assert_eq!(status, swarm_types::v16j::ChargingProfileStatus::Accepted);
}

#[tokio::test]
async fn disconnect_fails_pending_calls() {
    let (addr, state) = start_csms(false).await;
    let client = connect_station(addr, "CP-IT-03").await;

    for _ in 0..50 {
        if state.is_connected("CP-IT-03") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let state_clone = state.clone();
    let op = tokio::spawn(async move {
        state_clone.send_peak_shaving("CP-IT-03", 7400.0).await
    });

    // Drop the client without answering: the pending call must fail with
    // StationDisconnected, not linger until the deadline.
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(client);

    let result = tokio::time::timeout(Duration::from_secs(3), op)
        .await
        .expect("pending call not failed on disconnect")
        .unwrap();
    assert!(matches!(
        result,
        Err(swarm_csms::CsmsError::StationDisconnected { .. })
    ));

    // Registry entry is gone.
    for _ in 0..50 {
        if !state.is_connected("CP-IT-03") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!state.is_connected("CP-IT-03"));
}

#[tokio::test]
async fn duplicate_station_id_is_refused() {
    let (addr, state) = start_csms(false).await;
    let _first = connect_station(addr, "CP-IT-04").await;

    for _ in 0..50 {
        if state.is_connected("CP-IT-04") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut request = format!("ws://{addr}/ocpp/CP-IT-04")
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", "ocpp1.6".parse().unwrap());
    let result = tokio_tungstenite::connect_async(request).await;
    assert!(result.is_err(), "duplicate upgrade should be refused");
}

#[tokio::test]
async fn unknown_action_yields_call_error() {
    let (addr, _state) = start_csms(false).await;
    let mut client = connect_station(addr, "CP-IT-05").await;

    send_frame(&mut client, json!([2, "d1", "DataTransfer", {"vendorId": "x"}])).await;
    let reply = next_frame(&mut client).await;
    assert_eq!(reply[0], 4);
    assert_eq!(reply[1], "d1");
    assert_eq!(reply[2], "NotImplemented");
}
