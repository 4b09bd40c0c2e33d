pub mod error;

use std::ops::RangeInclusive;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use homegate_core::{DeviceId, SystemSnapshot};
use serde::{Deserialize, Serialize};

use crate::state::StateHandle;
use error::ApiError;

/// Setpoints the valves accept (°C).
const TARGET_RANGE_C: RangeInclusive<f32> = 4.0..=30.0;

#[derive(Debug, Deserialize)]
pub struct SetStateRequest {
    pub on: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetTargetRequest {
    pub celsius: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MaxPowerResponse {
    pub max_power_w: i32,
}

pub fn router(handle: StateHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/state", get(system_state))
        .route("/api/max-power", get(max_power))
        .route("/api/devices/{id}/state", post(set_device_state))
        .route("/api/devices/{id}/target", post(set_device_target))
        .with_state(handle)
}

async fn health() -> &'static str {
    "OK"
}

async fn system_state(State(handle): State<StateHandle>) -> Json<SystemSnapshot> {
    Json(handle.get_system_state().await)
}

async fn max_power(State(handle): State<StateHandle>) -> Json<MaxPowerResponse> {
    Json(MaxPowerResponse {
        max_power_w: handle.max_power_w(),
    })
}

async fn set_device_state(
    State(handle): State<StateHandle>,
    Path(id): Path<String>,
    Json(request): Json<SetStateRequest>,
) -> Result<StatusCode, ApiError> {
    let id = known_device(&handle, id).await?;
    handle.set_device_state(id, request.on)?;
    Ok(StatusCode::ACCEPTED)
}

async fn set_device_target(
    State(handle): State<StateHandle>,
    Path(id): Path<String>,
    Json(request): Json<SetTargetRequest>,
) -> Result<StatusCode, ApiError> {
    if !TARGET_RANGE_C.contains(&request.celsius) {
        return Err(ApiError::BadRequest(format!(
            "target must be within {}..={} °C",
            TARGET_RANGE_C.start(),
            TARGET_RANGE_C.end()
        )));
    }

    let id = known_device(&handle, id).await?;
    handle.set_device_target_temp(id, request.celsius)?;
    Ok(StatusCode::ACCEPTED)
}

/// Resolve `id` against the devices of the latest snapshot.
async fn known_device(handle: &StateHandle, id: String) -> Result<DeviceId, ApiError> {
    let id = DeviceId::from(id);
    let state = handle.get_system_state().await;
    if state.devices.iter().any(|d| d.id == id) {
        Ok(id)
    } else {
        Err(ApiError::NotFound(format!("device {id} not found")))
    }
}
