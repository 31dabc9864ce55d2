//! Inbound CALL handlers (CSMS → station).
//!
//! Dispatch is a static match on the action name; every handler is an
//! in-memory operation so the read loop never blocks for more than one
//! action turnaround. Smart-charging actions delegate to the agent's
//! profile manager, remote start/stop are refused, and Reset closes the
//! link so the supervisor reconnects like a rebooting charge point would.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use swarm_messages::v16j::*;
use swarm_messages::{extract_payload, OcppAction};
use swarm_transport::{call_over, LinkCommand};
use swarm_types::v16j::*;
use swarm_types::{Call, CallErrorCode, Message, OcppResult};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::agent::Shared;

/// What the read loop must do after sending the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PostAction {
    None,
    /// Close the link (simulated reboot after Reset).
    CloseLink,
}

pub(crate) struct InboundRouter {
    shared: Arc<Shared>,
    outbox: mpsc::Sender<LinkCommand>,
    call_timeout: Duration,
}

impl InboundRouter {
    pub(crate) fn new(
        shared: Arc<Shared>,
        outbox: mpsc::Sender<LinkCommand>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            shared,
            outbox,
            call_timeout,
        }
    }

    /// Handle one inbound CALL and produce its reply frame.
    pub(crate) fn handle(&self, call: &Call) -> (Message, PostAction) {
        let result = match call.action.as_str() {
            SetChargingProfileRequest::ACTION_NAME => self.on_set_charging_profile(call),
            GetCompositeScheduleRequest::ACTION_NAME => self.on_get_composite_schedule(call),
            ClearChargingProfileRequest::ACTION_NAME => self.on_clear_charging_profile(call),
            RemoteStartTransactionRequest::ACTION_NAME => self.on_remote_start(call),
            RemoteStopTransactionRequest::ACTION_NAME => self.on_remote_stop(call),
            ResetRequest::ACTION_NAME => return self.on_reset(call),
            ChangeAvailabilityRequest::ACTION_NAME => self.on_change_availability(call),
            TriggerMessageRequest::ACTION_NAME => self.on_trigger_message(call),
            other => {
                warn!("{}: unknown inbound action {other}", self.shared.station_id);
                Ok(Message::call_error(
                    call.unique_id.clone(),
                    CallErrorCode::NotImplemented,
                    format!("action '{other}' is not implemented"),
                ))
            }
        };

        let reply = result.unwrap_or_else(|err| {
            warn!(
                "{}: {} handler failed: {err}",
                self.shared.station_id, call.action
            );
            Message::call_error(
                call.unique_id.clone(),
                CallErrorCode::FormationViolation,
                err.to_string(),
            )
        });
        (reply, PostAction::None)
    }

    fn on_set_charging_profile(&self, call: &Call) -> OcppResult<Message> {
        let request: SetChargingProfileRequest = extract_payload(call)?;
        let profile = request.cs_charging_profiles;
        let profile_id = profile.charging_profile_id;
        let purpose = profile.charging_profile_purpose;
        let stack_level = profile.stack_level;

        let status = match self
            .shared
            .profiles
            .set_profile(request.connector_id, profile, Utc::now())
        {
            Ok(()) => {
                self.shared.logs.push(format!(
                    "SetChargingProfile accepted: profile {profile_id} \
                     (purpose={purpose}, stackLevel={stack_level})"
                ));
                ChargingProfileStatus::Accepted
            }
            Err(err) => {
                self.shared
                    .logs
                    .push(format!("SetChargingProfile rejected: {err}"));
                ChargingProfileStatus::Rejected
            }
        };

        Message::call_result(
            call.unique_id.clone(),
            SetChargingProfileResponse { status },
        )
    }

    fn on_get_composite_schedule(&self, call: &Call) -> OcppResult<Message> {
        let request: GetCompositeScheduleRequest = extract_payload(call)?;
        let unit = request.charging_rate_unit.unwrap_or(ChargingRateUnit::W);
        let now = Utc::now();
        let ctx = self.shared.charging_context();

        let duration = request.duration.max(0) as u32;
        let periods =
            self.shared
                .profiles
                .composite_schedule(request.connector_id, duration, unit, &ctx, now);

        if periods.is_empty() {
            self.shared.logs.push(format!(
                "GetCompositeSchedule rejected: no profiles for connector {}",
                request.connector_id
            ));
            return Message::call_result(
                call.unique_id.clone(),
                GetCompositeScheduleResponse {
                    status: GetCompositeScheduleStatus::Rejected,
                    connector_id: None,
                    schedule_start: None,
                    charging_schedule: None,
                },
            );
        }

        self.shared.logs.push(format!(
            "GetCompositeSchedule: {} periods for {}s on connector {}",
            periods.len(),
            request.duration,
            request.connector_id
        ));
        Message::call_result(
            call.unique_id.clone(),
            GetCompositeScheduleResponse {
                status: GetCompositeScheduleStatus::Accepted,
                connector_id: Some(request.connector_id),
                schedule_start: Some(now),
                charging_schedule: Some(ChargingSchedule {
                    duration: Some(request.duration),
                    start_schedule: Some(now),
                    charging_rate_unit: unit,
                    charging_schedule_period: periods,
                    min_charging_rate: None,
                }),
            },
        )
    }

    fn on_clear_charging_profile(&self, call: &Call) -> OcppResult<Message> {
        let request: ClearChargingProfileRequest = extract_payload(call)?;
        let filter = swarm_charging::ClearFilter {
            profile_id: request.id,
            connector_id: request.connector_id,
            purpose: request.charging_profile_purpose,
            stack_level: request.stack_level,
        };
        let removed = self.shared.profiles.clear_profiles(&filter);
        self.shared
            .logs
            .push(format!("ClearChargingProfile: cleared {removed} profiles"));

        let status = if removed > 0 {
            ClearChargingProfileStatus::Accepted
        } else {
            ClearChargingProfileStatus::Unknown
        };
        Message::call_result(
            call.unique_id.clone(),
            ClearChargingProfileResponse { status },
        )
    }

    fn on_remote_start(&self, call: &Call) -> OcppResult<Message> {
        let request: RemoteStartTransactionRequest = extract_payload(call)?;
        debug!(
            "{}: refusing RemoteStartTransaction for {}",
            self.shared.station_id, request.id_tag
        );
        Message::call_result(
            call.unique_id.clone(),
            RemoteStartTransactionResponse {
                status: RemoteStartStopStatus::Rejected,
            },
        )
    }

    fn on_remote_stop(&self, call: &Call) -> OcppResult<Message> {
        let _request: RemoteStopTransactionRequest = extract_payload(call)?;
        Message::call_result(
            call.unique_id.clone(),
            RemoteStopTransactionResponse {
                status: RemoteStartStopStatus::Rejected,
            },
        )
    }

    fn on_reset(&self, call: &Call) -> (Message, PostAction) {
        match extract_payload::<ResetRequest>(call) {
            Ok(request) => {
                self.shared
                    .logs
                    .push(format!("Reset requested ({:?})", request.reset_type));
                let reply = Message::call_result(
                    call.unique_id.clone(),
                    ResetResponse {
                        status: ResetStatus::Accepted,
                    },
                )
                .unwrap_or_else(|e| {
                    Message::call_error(
                        call.unique_id.clone(),
                        CallErrorCode::InternalError,
                        e.to_string(),
                    )
                });
                (reply, PostAction::CloseLink)
            }
            Err(err) => (
                Message::call_error(
                    call.unique_id.clone(),
                    CallErrorCode::FormationViolation,
                    err.to_string(),
                ),
                PostAction::None,
            ),
        }
    }

    fn on_change_availability(&self, call: &Call) -> OcppResult<Message> {
        let request: ChangeAvailabilityRequest = extract_payload(call)?;
        let status = match request.availability_type {
            AvailabilityType::Inoperative => ChargePointStatus::Unavailable,
            AvailabilityType::Operative => ChargePointStatus::Available,
        };
        self.shared.set_status(status);
        self.shared.logs.push(format!(
            "ChangeAvailability: connector {} now {status}",
            request.connector_id
        ));
        Message::call_result(
            call.unique_id.clone(),
            ChangeAvailabilityResponse {
                status: AvailabilityStatus::Accepted,
            },
        )
    }

    fn on_trigger_message(&self, call: &Call) -> OcppResult<Message> {
        let request: TriggerMessageRequest = extract_payload(call)?;
        let status = match request.requested_message {
            MessageTrigger::Heartbeat => {
                self.spawn_triggered_heartbeat();
                TriggerMessageStatus::Accepted
            }
            MessageTrigger::StatusNotification => {
                self.spawn_triggered_status();
                TriggerMessageStatus::Accepted
            }
            MessageTrigger::MeterValues => {
                if self.shared.current_transaction().is_some() {
                    self.spawn_triggered_meter_values();
                    TriggerMessageStatus::Accepted
                } else {
                    TriggerMessageStatus::Rejected
                }
            }
            MessageTrigger::BootNotification => TriggerMessageStatus::NotImplemented,
        };
        self.shared.logs.push(format!(
            "TriggerMessage({:?}): {status:?}",
            request.requested_message
        ));
        Message::call_result(call.unique_id.clone(), TriggerMessageResponse { status })
    }

    fn spawn_triggered_heartbeat(&self) {
        let shared = self.shared.clone();
        let outbox = self.outbox.clone();
        let timeout = self.call_timeout;
        tokio::spawn(async move {
            let Ok(payload) = serde_json::to_value(HeartbeatRequest {}) else {
                return;
            };
            if let Err(e) = call_over(
                &shared.router,
                &outbox,
                HeartbeatRequest::ACTION_NAME,
                payload,
                timeout,
            )
            .await
            {
                debug!("{}: triggered heartbeat failed: {e}", shared.station_id);
            } else {
                shared.logs.push("Heartbeat sent");
            }
        });
    }

    fn spawn_triggered_status(&self) {
        let shared = self.shared.clone();
        let outbox = self.outbox.clone();
        let timeout = self.call_timeout;
        tokio::spawn(async move {
            let request = StatusNotificationRequest {
                connector_id: crate::agent::CONNECTOR_ID,
                error_code: ChargePointErrorCode::NoError,
                status: shared.status(),
                timestamp: Some(Utc::now()),
                info: None,
            };
            let Ok(payload) = serde_json::to_value(&request) else {
                return;
            };
            if let Err(e) = call_over(
                &shared.router,
                &outbox,
                StatusNotificationRequest::ACTION_NAME,
                payload,
                timeout,
            )
            .await
            {
                debug!("{}: triggered status failed: {e}", shared.station_id);
            }
        });
    }

    fn spawn_triggered_meter_values(&self) {
        let shared = self.shared.clone();
        let outbox = self.outbox.clone();
        let timeout = self.call_timeout;
        tokio::spawn(async move {
            let Some(tx) = shared.current_transaction() else {
                return;
            };
            let energy = shared.session_energy_wh.load();
            let request = MeterValuesRequest {
                connector_id: crate::agent::CONNECTOR_ID,
                transaction_id: Some(tx.id),
                meter_values: vec![MeterValue {
                    timestamp: Utc::now(),
                    sampled_values: vec![SampledValue::energy_register(energy)],
                }],
            };
            let Ok(payload) = serde_json::to_value(&request) else {
                return;
            };
            if let Err(e) = call_over(
                &shared.router,
                &outbox,
                MeterValuesRequest::ACTION_NAME,
                payload,
                timeout,
            )
            .await
            {
                debug!("{}: triggered meter values failed: {e}", shared.station_id);
            }
        });
    }
}
