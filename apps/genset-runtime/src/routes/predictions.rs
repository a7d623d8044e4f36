use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;

use super::devices::normalize_device_id;
use crate::error::{AppError, AppResult};
use crate::services::correction::{AccuracyMetrics, DepletionOutcome};
use crate::services::prediction::types::{PredictionCycleReport, RuntimePrediction, Subsystem};
use crate::state::AppState;

/// Event timestamps may run slightly ahead of the server clock.
const MAX_CLOCK_SKEW_MINUTES: i64 = 5;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DepletionEventRequest {
    pub(crate) subsystem: Subsystem,
    #[serde(default)]
    pub(crate) timestamp: Option<DateTime<Utc>>,
}

fn parse_subsystem(raw: &str) -> AppResult<Subsystem> {
    raw.parse().map_err(AppError::bad_request)
}

pub(crate) async fn run_cycle(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> AppResult<Json<PredictionCycleReport>> {
    let device_id = normalize_device_id(&device_id)?;
    Ok(Json(state.engine.run_prediction_cycle(&device_id).await?))
}

pub(crate) async fn latest_prediction(
    State(state): State<AppState>,
    Path((device_id, subsystem)): Path<(String, String)>,
) -> AppResult<Json<RuntimePrediction>> {
    let device_id = normalize_device_id(&device_id)?;
    let subsystem = parse_subsystem(&subsystem)?;
    state
        .corrections
        .latest_prediction(&device_id, subsystem)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("no {subsystem} prediction for {device_id}")))
}

pub(crate) async fn record_depletion_event(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(payload): Json<DepletionEventRequest>,
) -> AppResult<Json<DepletionOutcome>> {
    let device_id = normalize_device_id(&device_id)?;
    let now = Utc::now();
    let actual_at = payload.timestamp.unwrap_or(now);
    if actual_at > now + ChronoDuration::minutes(MAX_CLOCK_SKEW_MINUTES) {
        return Err(AppError::bad_request("timestamp must not be in the future"));
    }
    let outcome = state
        .corrections
        .record_depletion_event(&device_id, payload.subsystem, actual_at)
        .await?;
    Ok(Json(outcome))
}

pub(crate) async fn accuracy(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> AppResult<Json<AccuracyMetrics>> {
    let device_id = normalize_device_id(&device_id)?;
    Ok(Json(state.corrections.accuracy_metrics(&device_id).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/devices/{device_id}/predictions/run", post(run_cycle))
        .route(
            "/devices/{device_id}/predictions/{subsystem}/latest",
            get(latest_prediction),
        )
        .route(
            "/devices/{device_id}/depletion-events",
            post(record_depletion_event),
        )
        .route("/devices/{device_id}/accuracy", get(accuracy))
}
