//! Thin REST/JSON surface over the manager's capability set.
//!
//! One route per control-plane capability; failures come back as structured
//! `{"detail": ...}` bodies with the matching status code. The transport is
//! deliberately dumb; every decision lives in [`StationManager`].

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use swarm_charging::TestProfileParams;
use swarm_messages::v16j::ClearChargingProfileRequest;
use swarm_types::v16j::{
    ChargingProfile, ChargingProfilePurpose, ChargingRateUnit, GetCompositeScheduleStatus,
};

use crate::error::ManagerError;
use crate::manager::StationManager;

/// Build the control-plane router.
pub fn router(manager: Arc<StationManager>) -> Router {
    Router::new()
        .route("/stations", get(list_stations))
        .route("/stations/scale", post(scale))
        .route("/stations/start", post(start_station))
        .route("/stations/stop", post(stop_station))
        .route("/stations/start_all", post(start_all))
        .route("/stations/stop_all", post(stop_all))
        .route("/stations/:id/logs", get(station_logs))
        .route(
            "/stations/:id/charging_profile",
            post(send_charging_profile).delete(clear_charging_profile),
        )
        .route("/stations/:id/composite_schedule", get(composite_schedule))
        .route("/stations/:id/test_profiles", post(send_test_profile))
        .route("/pricing", get(get_price).post(set_price))
        .route("/totals", get(get_totals))
        .with_state(manager)
}

struct ApiError(ManagerError);

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ManagerError::NotFound { .. } => StatusCode::NOT_FOUND,
            ManagerError::Csms(swarm_csms::CsmsError::StationDisconnected { .. }) => {
                StatusCode::NOT_FOUND
            }
            ManagerError::UnknownPreset { .. }
            | ManagerError::InvalidPrice { .. }
            | ManagerError::InvalidCount { .. } => StatusCode::BAD_REQUEST,
            ManagerError::Ocpp(swarm_types::OcppError::Validation { .. }) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

async fn list_stations(State(manager): State<Arc<StationManager>>) -> impl IntoResponse {
    Json(manager.snapshots().await)
}

#[derive(Debug, Deserialize)]
struct ScaleRequest {
    count: usize,
    #[serde(default = "default_preset")]
    profile: String,
}

fn default_preset() -> String {
    "default".to_string()
}

async fn scale(
    State(manager): State<Arc<StationManager>>,
    Json(request): Json<ScaleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let count = manager.scale(request.count, &request.profile).await?;
    Ok(Json(json!({ "count": count })))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    station_id: String,
    #[serde(default = "default_preset")]
    profile: String,
}

async fn start_station(
    State(manager): State<Arc<StationManager>>,
    Json(request): Json<StartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = manager
        .start_station(&request.station_id, &request.profile)
        .await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct StopRequest {
    station_id: String,
}

async fn stop_station(
    State(manager): State<Arc<StationManager>>,
    Json(request): Json<StopRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = manager.stop_station(&request.station_id).await?;
    Ok(Json(snapshot))
}

async fn start_all(State(manager): State<Arc<StationManager>>) -> impl IntoResponse {
    let started = manager.start_all().await;
    Json(json!({ "started": started }))
}

async fn stop_all(State(manager): State<Arc<StationManager>>) -> impl IntoResponse {
    let stopped = manager.stop_all().await;
    Json(json!({ "stopped": stopped }))
}

async fn station_logs(
    State(manager): State<Arc<StationManager>>,
    Path(station_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let logs = manager.station_logs(&station_id).await?;
    Ok(Json(json!({
        "station_id": station_id,
        "count": logs.len(),
        "logs": logs,
    })))
}

#[derive(Debug, Serialize, Deserialize)]
struct PriceUpdate {
    price: f64,
}

async fn get_price(State(manager): State<Arc<StationManager>>) -> impl IntoResponse {
    Json(PriceUpdate {
        price: manager.get_price(),
    })
}

async fn set_price(
    State(manager): State<Arc<StationManager>>,
    Json(request): Json<PriceUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let price = manager.set_price(request.price).await?;
    Ok(Json(PriceUpdate { price }))
}

async fn get_totals(State(manager): State<Arc<StationManager>>) -> impl IntoResponse {
    Json(manager.totals().await)
}

#[derive(Debug, Deserialize)]
struct ChargingProfileRequest {
    connector_id: u32,
    profile: ChargingProfile,
}

async fn send_charging_profile(
    State(manager): State<Arc<StationManager>>,
    Path(station_id): Path<String>,
    Json(request): Json<ChargingProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (profile_id, status) = manager
        .send_charging_profile(&station_id, request.connector_id, request.profile)
        .await?;
    Ok(Json(json!({
        "station_id": station_id,
        "profile_id": profile_id,
        "status": status,
    })))
}

#[derive(Debug, Deserialize)]
struct CompositeScheduleQuery {
    connector_id: u32,
    duration: i32,
    charging_rate_unit: Option<ChargingRateUnit>,
}

async fn composite_schedule(
    State(manager): State<Arc<StationManager>>,
    Path(station_id): Path<String>,
    Query(query): Query<CompositeScheduleQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let response = manager
        .get_composite_schedule(
            &station_id,
            query.connector_id,
            query.duration,
            query.charging_rate_unit,
        )
        .await?;
    if response.status == GetCompositeScheduleStatus::Rejected {
        return Ok(Json(json!({ "status": "Rejected", "station_id": station_id })));
    }
    Ok(Json(json!({
        "status": "Accepted",
        "station_id": station_id,
        "connector_id": response.connector_id,
        "schedule_start": response.schedule_start,
        "charging_schedule": response.charging_schedule,
    })))
}

#[derive(Debug, Deserialize)]
struct ClearProfileQuery {
    profile_id: Option<i32>,
    connector_id: Option<u32>,
    purpose: Option<ChargingProfilePurpose>,
    stack_level: Option<i32>,
}

async fn clear_charging_profile(
    State(manager): State<Arc<StationManager>>,
    Path(station_id): Path<String>,
    Query(query): Query<ClearProfileQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = ClearChargingProfileRequest {
        id: query.profile_id,
        connector_id: query.connector_id,
        charging_profile_purpose: query.purpose,
        stack_level: query.stack_level,
    };
    let status = manager
        .clear_charging_profile(&station_id, filter.clone())
        .await?;
    Ok(Json(json!({
        "station_id": station_id,
        "status": status,
        "filters": {
            "profile_id": filter.id,
            "connector_id": filter.connector_id,
            "purpose": filter.charging_profile_purpose,
            "stack_level": filter.stack_level,
        },
    })))
}

async fn send_test_profile(
    State(manager): State<Arc<StationManager>>,
    Path(station_id): Path<String>,
    Json(params): Json<TestProfileParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (profile, status) = manager.send_test_profile(&station_id, &params).await?;
    Ok(Json(json!({
        "station_id": station_id,
        "scenario": params.scenario,
        "profile": profile,
        "send_status": status,
    })))
}
