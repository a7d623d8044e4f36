pub mod devices;
pub mod health;
pub mod predictions;
pub mod thresholds;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(devices::router())
                .merge(thresholds::router())
                .merge(predictions::router()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSpec;
    use crate::services::prediction::types::Subsystem;
    use crate::store::{DeviceRegistry, MemoryStore, Stores};
    use crate::test_support::{pending_prediction, test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Stores, Router) {
        let stores = Stores::from_adapter(Arc::new(MemoryStore::new()));
        (stores.clone(), router(test_state(stores)))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn healthz_counts_registered_devices() {
        let (_stores, app) = app();
        let (status, body) = send(&app, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["devices"], 0);
        assert_eq!(body["prediction_interval_seconds"], 1800);

        send(&app, "PUT", "/api/devices/gen-1", Some(json!({}))).await;
        let (_, body) = send(&app, "GET", "/healthz", None).await;
        assert_eq!(body["devices"], 1);
    }

    struct UnreachableRegistry;

    #[async_trait::async_trait]
    impl DeviceRegistry for UnreachableRegistry {
        async fn device_exists(&self, _device_id: &str) -> anyhow::Result<bool> {
            anyhow::bail!("connection refused")
        }

        async fn list_devices(&self) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("connection refused")
        }

        async fn device_spec(&self, _device_id: &str) -> anyhow::Result<Option<DeviceSpec>> {
            anyhow::bail!("connection refused")
        }

        async fn upsert_device(&self, _device_id: &str, _spec: &DeviceSpec) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn healthz_is_unavailable_when_store_fails() {
        let mut stores = Stores::from_adapter(Arc::new(MemoryStore::new()));
        stores.devices = Arc::new(UnreachableRegistry);
        let app = router(test_state(stores));

        let (status, body) = send(&app, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "store_unavailable");
        assert!(body.get("devices").is_none());
    }

    #[tokio::test]
    async fn registering_a_device_bootstraps_thresholds() {
        let (_stores, app) = app();
        let (status, body) = send(
            &app,
            "PUT",
            "/api/devices/gen-1",
            Some(json!({ "fuel_tank_capacity_liters": 400.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["thresholds_created"], 18);

        let (status, body) = send(&app, "GET", "/api/devices/gen-1/thresholds", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(18));

        let (status, body) =
            send(&app, "POST", "/api/devices/gen-1/thresholds/defaults", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], 0);
    }

    #[tokio::test]
    async fn rejects_non_positive_device_spec() {
        let (_stores, app) = app();
        let (status, _) = send(
            &app,
            "PUT",
            "/api/devices/gen-1",
            Some(json!({ "generator_capacity_kw": -5.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let (_stores, app) = app();
        let (status, body) = send(&app, "GET", "/api/devices/gen-404/accuracy", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("gen-404"));

        let (status, _) = send(
            &app,
            "POST",
            "/api/devices/gen-404/evaluate",
            Some(json!({ "timestamp": "2025-03-01T00:00:00Z" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn evaluate_and_ingest_raise_alarms_from_controller_fields() {
        let (stores, app) = app();
        send(&app, "PUT", "/api/devices/gen-1", Some(json!({}))).await;

        let snapshot = json!({
            "timestamp": "2025-03-01T00:00:00Z",
            "Oil_Pressure": 0.5,
            "Oil_Temperature": 130.0,
            "RPM": 1500.0
        });
        let (status, body) =
            send(&app, "POST", "/api/devices/gen-1/evaluate", Some(snapshot.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let alarms = body["alarms"].as_array().unwrap();
        assert_eq!(alarms.len(), 2);
        assert!(alarms
            .iter()
            .any(|a| a["severity"] == "WARNING" && a["parameter"] == "OIL_PRESSURE"));
        assert!(alarms.iter().any(|a| a["severity"] == "CRITICAL"));

        let (status, _) = send(&app, "POST", "/api/devices/gen-1/telemetry", Some(snapshot)).await;
        assert_eq!(status, StatusCode::OK);
        let stored = stores
            .telemetry
            .snapshots(
                "gen-1",
                crate::test_support::at(-1),
                crate::test_support::at(1),
            )
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn threshold_update_validates_parameter_and_bounds() {
        let (_stores, app) = app();
        send(&app, "PUT", "/api/devices/gen-1", Some(json!({}))).await;

        let (status, body) = send(
            &app,
            "PUT",
            "/api/devices/gen-1/thresholds/fuel_level",
            Some(json!({ "min_value": 30.0, "max_value": 100.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["parameter"], "FUEL_LEVEL");
        assert_eq!(body["min_value"], 30.0);

        let (status, _) = send(
            &app,
            "PUT",
            "/api/devices/gen-1/thresholds/FUEL_LEVEL",
            Some(json!({ "min_value": 80.0, "max_value": 20.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "PUT",
            "/api/devices/gen-1/thresholds/NOT_A_PARAMETER",
            Some(json!({ "min_value": 0.0, "max_value": 1.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn prediction_run_then_latest_and_unavailable_battery() {
        let (stores, app) = app();
        send(&app, "PUT", "/api/devices/gen-1", Some(json!({}))).await;

        let latest = "/api/devices/gen-1/predictions/generator/latest";
        let (status, _) = send(&app, "GET", latest, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let now = Utc::now();
        let snapshot = crate::telemetry::TelemetrySnapshot {
            timestamp: now - ChronoDuration::minutes(1),
            fuel_level: Some(50.0),
            ..Default::default()
        };
        stores.telemetry.insert_snapshot("gen-1", &snapshot).await.unwrap();

        let (status, body) = send(&app, "POST", "/api/devices/gen-1/predictions/run", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["generator"]["status"], "predicted");
        assert_eq!(body["generator"]["rate_source"], "estimated");
        assert_eq!(body["battery"]["status"], "unavailable");
        assert_eq!(body["battery"]["reason"], "no_voltage_reading");

        let (status, body) = send(&app, "GET", latest, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fuel_level_percent"], 50.0);

        let (status, _) =
            send(&app, "GET", "/api/devices/gen-1/predictions/solar/latest", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn depletion_event_reconciles_and_updates_accuracy() {
        let (stores, app) = app();
        send(&app, "PUT", "/api/devices/gen-1", Some(json!({}))).await;

        let predicted_at = Utc::now() - ChronoDuration::hours(12);
        let prediction =
            pending_prediction("gen-1", Subsystem::Generator, predicted_at, 10.0, 10.0);
        stores.predictions.insert_prediction(&prediction).await.unwrap();

        let actual_at = predicted_at + ChronoDuration::hours(12);
        let (status, body) = send(
            &app,
            "POST",
            "/api/devices/gen-1/depletion-events",
            Some(json!({ "subsystem": "generator", "timestamp": actual_at })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "reconciled");
        assert_eq!(body["factor_updated"], true);
        // 1.0 + 0.3 * (1.2 - 1.0)
        let factor = body["correction"]["correction_factor"].as_f64().unwrap();
        assert!((factor - 1.06).abs() < 1e-9);

        let (status, body) = send(&app, "GET", "/api/devices/gen-1/accuracy", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["generator"]["actual_event_count"], 1);
        assert_eq!(body["battery"]["correction_factor"], 1.0);

        // Nothing left to reconcile.
        let (status, body) = send(
            &app,
            "POST",
            "/api/devices/gen-1/depletion-events",
            Some(json!({ "subsystem": "generator" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "no_match");
    }

    #[tokio::test]
    async fn depletion_event_in_the_future_is_rejected() {
        let (_stores, app) = app();
        send(&app, "PUT", "/api/devices/gen-1", Some(json!({}))).await;
        let (status, _) = send(
            &app,
            "POST",
            "/api/devices/gen-1/depletion-events",
            Some(json!({
                "subsystem": "battery",
                "timestamp": Utc::now() + ChronoDuration::days(1)
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
