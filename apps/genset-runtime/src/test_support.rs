use crate::config::RuntimeConfig;
use crate::device::DeviceSpec;
use crate::services::prediction::types::{RateSource, RuntimePrediction, Subsystem};
use crate::state::AppState;
use crate::store::{MemoryStore, Stores};
use crate::telemetry::TelemetrySnapshot;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
}

pub fn at(minutes: i64) -> DateTime<Utc> {
    base_time() + ChronoDuration::minutes(minutes)
}

pub fn snapshot_at(minutes: i64) -> TelemetrySnapshot {
    TelemetrySnapshot {
        timestamp: at(minutes),
        ..Default::default()
    }
}

pub fn fuel_series(points: &[(i64, f64)]) -> Vec<TelemetrySnapshot> {
    points
        .iter()
        .map(|&(minutes, level)| TelemetrySnapshot {
            fuel_level: Some(level),
            ..snapshot_at(minutes)
        })
        .collect()
}

pub fn battery_series(points: &[(i64, f64)]) -> Vec<TelemetrySnapshot> {
    points
        .iter()
        .map(|&(minutes, volts)| TelemetrySnapshot {
            battery_volts: Some(volts),
            ..snapshot_at(minutes)
        })
        .collect()
}

pub fn with_load(mut snapshots: Vec<TelemetrySnapshot>, kw: f64) -> Vec<TelemetrySnapshot> {
    for snapshot in &mut snapshots {
        snapshot.generator_p_l1 = Some(kw);
    }
    snapshots
}

pub async fn seeded_store(
    device_id: &str,
    spec: Option<DeviceSpec>,
    snapshots: Vec<TelemetrySnapshot>,
) -> Arc<MemoryStore> {
    use crate::store::{DeviceRegistry, TelemetryStore};

    let store = Arc::new(MemoryStore::new());
    store
        .upsert_device(device_id, &spec.unwrap_or_default())
        .await
        .expect("register device");
    for snapshot in &snapshots {
        store
            .insert_snapshot(device_id, snapshot)
            .await
            .expect("insert snapshot");
    }
    store
}

pub async fn memory_stores(
    device_id: &str,
    spec: Option<DeviceSpec>,
) -> (Arc<MemoryStore>, Stores) {
    let store = seeded_store(device_id, spec, Vec::new()).await;
    let stores = Stores::from_adapter(store.clone());
    (store, stores)
}

/// An unreconciled prediction as the engine would have written it.
pub fn pending_prediction(
    device_id: &str,
    subsystem: Subsystem,
    predicted_at: DateTime<Utc>,
    raw_hours: f64,
    corrected_hours: f64,
) -> RuntimePrediction {
    RuntimePrediction {
        id: Uuid::new_v4(),
        device_id: device_id.to_string(),
        subsystem,
        predicted_at,
        fuel_level_percent: None,
        battery_voltage: None,
        battery_soc_percent: None,
        avg_load_kw: None,
        depletion_rate: 1.0,
        rate_source: RateSource::Measured,
        fuel_burn_rate_liters_per_hour: None,
        raw_runtime_hours: raw_hours,
        correction_factor: if raw_hours > 0.0 {
            corrected_hours / raw_hours
        } else {
            1.0
        },
        predicted_runtime_hours: corrected_hours,
        confidence: 0.7,
        predicted_depletion_at: predicted_at
            + ChronoDuration::milliseconds((corrected_hours * 3_600_000.0) as i64),
        actual_runtime_hours: None,
        actual_depletion_at: None,
        error_hours: None,
        error_percent: None,
    }
}

pub fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        database_url: None,
        ..RuntimeConfig::default()
    }
}

pub fn test_state(stores: Stores) -> AppState {
    AppState::new(test_config(), stores)
}
