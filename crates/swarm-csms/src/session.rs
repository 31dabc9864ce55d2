//! Per-session server-side agent.
//!
//! Mirrors the station's envelope machinery: a writer task serializes
//! outgoing frames, the read loop answers inbound CALLs from the station
//! and resolves replies to CSMS-originated CALLs. Session teardown removes
//! the registry entry and fails pending calls with `StationDisconnected`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use swarm_messages::v16j::*;
use swarm_messages::{extract_payload, OcppAction};
use swarm_transport::LinkCommand;
use swarm_types::v16j::{IdTagInfo, Measurand};
use swarm_types::{Call, CallErrorCode, Message, OcppResult};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::{CsmsState, SessionHandle};

/// Drive one accepted WebSocket until it closes.
pub(crate) async fn run_session(socket: WebSocket, state: Arc<CsmsState>, station_id: String) {
    let (mut sink, mut source) = socket.split();
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<LinkCommand>(64);

    let handle = Arc::new(SessionHandle::new(
        station_id.clone(),
        outbox_tx.clone(),
        Duration::from_secs(state.config.call_timeout_secs),
    ));
    if let Err(e) = state.register_session(handle.clone()).await {
        // Duplicate id and replacement is off: refuse with policy violation.
        warn!("{station_id}: {e}");
        let _ = sink
            .send(WsMessage::Close(Some(axum::extract::ws::CloseFrame {
                code: 1008,
                reason: "station already connected".into(),
            })))
            .await;
        return;
    }

    // Registry cleanup runs however the session ends.
    let cleanup_state = state.clone();
    let cleanup_handle = handle.clone();
    let _cleanup = scopeguard::guard((), move |_| {
        cleanup_state.remove_session(&cleanup_handle);
    });

    let writer = tokio::spawn(async move {
        while let Some(command) = outbox_rx.recv().await {
            match command {
                LinkCommand::Send(text) => {
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                LinkCommand::Close => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    info!("{station_id}: session established");
    while let Some(frame) = source.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match swarm_messages::decode(&text) {
                Ok(Message::Call(call)) => {
                    let reply = handle_action(&state, &station_id, &call);
                    match swarm_messages::encode(&reply) {
                        Ok(frame) => {
                            if outbox_tx.send(LinkCommand::Send(frame)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("{station_id}: reply encode failed: {e}"),
                    }
                }
                Ok(Message::CallResult(result)) => {
                    if handle
                        .router
                        .resolve(&result.unique_id, result.payload)
                        .is_none()
                    {
                        warn!(
                            "{station_id}: dropping unmatched CALLRESULT [{}]",
                            result.unique_id
                        );
                    }
                }
                Ok(Message::CallError(error)) => {
                    if handle
                        .router
                        .reject(&error.unique_id, error.error_code, error.error_description)
                        .is_none()
                    {
                        warn!(
                            "{station_id}: dropping unmatched CALLERROR [{}]",
                            error.unique_id
                        );
                    }
                }
                Err(e) => {
                    // A malformed frame ends the session.
                    warn!("{station_id}: malformed frame: {e}");
                    let _ = outbox_tx.send(LinkCommand::Close).await;
                    break;
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("{station_id}: socket error: {e}");
                break;
            }
        }
    }

    // The registry (and any in-flight facade call) may still hold outbox
    // senders; an explicit Close unblocks the writer regardless.
    let _ = outbox_tx.send(LinkCommand::Close).await;
    drop(outbox_tx);
    let _ = writer.await;
    info!("{station_id}: session closed");
}

/// Answer one station-originated CALL.
fn handle_action(state: &CsmsState, station_id: &str, call: &Call) -> Message {
    let result = match call.action.as_str() {
        BootNotificationRequest::ACTION_NAME => on_boot_notification(state, station_id, call),
        HeartbeatRequest::ACTION_NAME => on_heartbeat(call),
        AuthorizeRequest::ACTION_NAME => on_authorize(state, station_id, call),
        StartTransactionRequest::ACTION_NAME => on_start_transaction(state, station_id, call),
        MeterValuesRequest::ACTION_NAME => on_meter_values(state, station_id, call),
        StopTransactionRequest::ACTION_NAME => on_stop_transaction(state, station_id, call),
        StatusNotificationRequest::ACTION_NAME => on_status_notification(state, station_id, call),
        other => {
            warn!("{station_id}: unsupported action {other}");
            Ok(Message::call_error(
                call.unique_id.clone(),
                CallErrorCode::NotImplemented,
                format!("action '{other}' is not supported"),
            ))
        }
    };

    result.unwrap_or_else(|err| {
        warn!("{station_id}: {} handler failed: {err}", call.action);
        Message::call_error(
            call.unique_id.clone(),
            CallErrorCode::FormationViolation,
            err.to_string(),
        )
    })
}

fn on_boot_notification(state: &CsmsState, station_id: &str, call: &Call) -> OcppResult<Message> {
    let request: BootNotificationRequest = extract_payload(call)?;
    info!(
        "{station_id}: BootNotification vendor={} model={}",
        request.charge_point_vendor, request.charge_point_model
    );
    Message::call_result(
        call.unique_id.clone(),
        BootNotificationResponse {
            current_time: Utc::now(),
            interval: state.config.heartbeat_interval,
            status: RegistrationStatus::Accepted,
        },
    )
}

fn on_heartbeat(call: &Call) -> OcppResult<Message> {
    let _request: HeartbeatRequest = extract_payload(call)?;
    Message::call_result(
        call.unique_id.clone(),
        HeartbeatResponse {
            current_time: Utc::now(),
        },
    )
}

fn on_authorize(state: &CsmsState, station_id: &str, call: &Call) -> OcppResult<Message> {
    let request: AuthorizeRequest = extract_payload(call)?;
    let blocked = state
        .config
        .blocked_id_tags
        .iter()
        .any(|tag| tag == &request.id_tag);
    if blocked {
        info!("{station_id}: Authorize {} blocked", request.id_tag);
    } else {
        debug!("{station_id}: Authorize {}", request.id_tag);
    }
    Message::call_result(
        call.unique_id.clone(),
        AuthorizeResponse {
            id_tag_info: if blocked {
                IdTagInfo::blocked()
            } else {
                IdTagInfo::accepted()
            },
        },
    )
}

fn on_start_transaction(state: &CsmsState, station_id: &str, call: &Call) -> OcppResult<Message> {
    let request: StartTransactionRequest = extract_payload(call)?;
    let transaction_id = state.record_transaction_start(
        station_id,
        request.connector_id,
        &request.id_tag,
        request.meter_start,
        request.timestamp,
    );
    info!(
        "{station_id}: StartTransaction {transaction_id} on connector {} (idTag {})",
        request.connector_id, request.id_tag
    );
    Message::call_result(
        call.unique_id.clone(),
        StartTransactionResponse {
            id_tag_info: IdTagInfo::accepted(),
            transaction_id,
        },
    )
}

fn on_meter_values(state: &CsmsState, station_id: &str, call: &Call) -> OcppResult<Message> {
    let request: MeterValuesRequest = extract_payload(call)?;
    if let (Some(tx_id), Some(energy)) = (request.transaction_id, energy_register(&request)) {
        state.record_meter_values(tx_id, energy);
        debug!("{station_id}: MeterValues tx={tx_id} energy={energy}Wh");
    }
    Message::call_result(call.unique_id.clone(), MeterValuesResponse {})
}

fn on_stop_transaction(state: &CsmsState, station_id: &str, call: &Call) -> OcppResult<Message> {
    let request: StopTransactionRequest = extract_payload(call)?;
    state.record_transaction_stop(request.transaction_id, request.meter_stop);
    info!(
        "{station_id}: StopTransaction {} at {}Wh",
        request.transaction_id, request.meter_stop
    );
    Message::call_result(
        call.unique_id.clone(),
        StopTransactionResponse {
            id_tag_info: Some(IdTagInfo::accepted()),
        },
    )
}

fn on_status_notification(state: &CsmsState, station_id: &str, call: &Call) -> OcppResult<Message> {
    let request: StatusNotificationRequest = extract_payload(call)?;
    debug!(
        "{station_id}: StatusNotification connector={} status={}",
        request.connector_id, request.status
    );
    state.record_status(station_id, request.connector_id, request.status);
    Message::call_result(call.unique_id.clone(), StatusNotificationResponse {})
}

/// The latest energy register sample in a MeterValues request, Wh.
fn energy_register(request: &MeterValuesRequest) -> Option<i32> {
    request
        .meter_values
        .iter()
        .rev()
        .flat_map(|mv| mv.sampled_values.iter())
        .find(|sv| sv.measurand == Some(Measurand::EnergyActiveImportRegister))
        .and_then(|sv| sv.value.parse::<f64>().ok())
        .map(|wh| wh.round() as i32)
}
