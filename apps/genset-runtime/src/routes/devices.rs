use axum::extract::{Path, State};
use axum::routing::{post, put};
use axum::{Json, Router};
use serde::Serialize;

use crate::device::DeviceSpec;
use crate::error::{AppError, AppResult, CoreError};
use crate::services::thresholds::types::ThresholdReport;
use crate::state::AppState;
use crate::telemetry::TelemetrySnapshot;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct DeviceResponse {
    pub(crate) device_id: String,
    pub(crate) spec: DeviceSpec,
    pub(crate) thresholds_created: u64,
}

pub(crate) fn normalize_device_id(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request("device_id must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn validate_spec(spec: &DeviceSpec) -> AppResult<()> {
    let fields = [
        ("fuel_tank_capacity_liters", spec.fuel_tank_capacity_liters),
        ("battery_voltage_nominal", spec.battery_voltage_nominal),
        ("generator_capacity_kw", spec.generator_capacity_kw),
        ("battery_capacity_ah", spec.battery_capacity_ah),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            if !value.is_finite() || value <= 0.0 {
                return Err(AppError::bad_request(format!("{name} must be > 0")));
            }
        }
    }
    Ok(())
}

/// Registers or updates a device and bootstraps its default threshold rules.
pub(crate) async fn put_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(spec): Json<DeviceSpec>,
) -> AppResult<Json<DeviceResponse>> {
    let device_id = normalize_device_id(&device_id)?;
    validate_spec(&spec)?;

    state
        .stores
        .devices
        .upsert_device(&device_id, &spec)
        .await
        .map_err(CoreError::Store)?;
    let thresholds_created = state.thresholds.initialize_defaults(&device_id).await?;
    tracing::info!(device_id, thresholds_created, "device registered");

    Ok(Json(DeviceResponse {
        device_id,
        spec,
        thresholds_created,
    }))
}

/// Stores a snapshot and evaluates it against the device's rules.
pub(crate) async fn ingest_telemetry(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(snapshot): Json<TelemetrySnapshot>,
) -> AppResult<Json<ThresholdReport>> {
    let device_id = normalize_device_id(&device_id)?;
    let report = state.thresholds.evaluate(&device_id, &snapshot).await?;
    state
        .stores
        .telemetry
        .insert_snapshot(&device_id, &snapshot)
        .await
        .map_err(CoreError::Store)?;
    Ok(Json(report))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/devices/{device_id}", put(put_device))
        .route("/devices/{device_id}/telemetry", post(ingest_telemetry))
}
