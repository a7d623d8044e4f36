use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Registered devices; absent when the store could not be reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<usize>,
    pub prediction_interval_seconds: u64,
}

/// Liveness plus a store round trip; an unreachable store answers 503.
pub(crate) async fn healthz_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let prediction_interval_seconds = state.config.prediction_interval_seconds;
    match state.stores.devices.list_devices().await {
        Ok(devices) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                devices: Some(devices.len()),
                prediction_interval_seconds,
            }),
        ),
        Err(err) => {
            tracing::warn!("health check could not reach the store: {err:#}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "store_unavailable",
                    devices: None,
                    prediction_interval_seconds,
                }),
            )
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz_handler))
}
