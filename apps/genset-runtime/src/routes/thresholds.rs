use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::devices::normalize_device_id;
use crate::error::{AppError, AppResult};
use crate::services::thresholds::types::{ThresholdParameter, ThresholdReport, ThresholdRule};
use crate::state::AppState;
use crate::telemetry::TelemetrySnapshot;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UpdateRuleRequest {
    pub(crate) min_value: f64,
    pub(crate) max_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct DefaultsResponse {
    pub(crate) created: u64,
}

pub(crate) async fn evaluate_snapshot(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(snapshot): Json<TelemetrySnapshot>,
) -> AppResult<Json<ThresholdReport>> {
    let device_id = normalize_device_id(&device_id)?;
    Ok(Json(state.thresholds.evaluate(&device_id, &snapshot).await?))
}

pub(crate) async fn list_rules(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> AppResult<Json<Vec<ThresholdRule>>> {
    let device_id = normalize_device_id(&device_id)?;
    Ok(Json(state.thresholds.rules(&device_id).await?))
}

pub(crate) async fn create_defaults(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> AppResult<Json<DefaultsResponse>> {
    let device_id = normalize_device_id(&device_id)?;
    let created = state.thresholds.initialize_defaults(&device_id).await?;
    Ok(Json(DefaultsResponse { created }))
}

pub(crate) async fn update_rule(
    State(state): State<AppState>,
    Path((device_id, parameter)): Path<(String, String)>,
    Json(payload): Json<UpdateRuleRequest>,
) -> AppResult<Json<ThresholdRule>> {
    let device_id = normalize_device_id(&device_id)?;
    let parameter: ThresholdParameter = parameter.parse().map_err(AppError::bad_request)?;
    let rule = state
        .thresholds
        .update_rule(&device_id, parameter, payload.min_value, payload.max_value)
        .await?;
    Ok(Json(rule))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/devices/{device_id}/evaluate", post(evaluate_snapshot))
        .route("/devices/{device_id}/thresholds", get(list_rules))
        .route(
            "/devices/{device_id}/thresholds/defaults",
            post(create_defaults),
        )
        .route(
            "/devices/{device_id}/thresholds/{parameter}",
            put(update_rule),
        )
}
