//! Persistence ports consumed by the analyzers, engines and learning loop, plus the two
//! adapters that implement them.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::device::DeviceSpec;
use crate::services::correction::CorrectionFactors;
use crate::services::prediction::types::{RuntimePrediction, Subsystem};
use crate::services::thresholds::types::ThresholdRule;
use crate::telemetry::TelemetrySnapshot;

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Snapshots with `start <= timestamp <= end`, oldest first.
    async fn snapshots(
        &self,
        device_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySnapshot>>;

    async fn insert_snapshot(&self, device_id: &str, snapshot: &TelemetrySnapshot) -> Result<()>;

    /// Deletes every snapshot older than `cutoff`; returns how many were removed.
    async fn prune_snapshots_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn device_exists(&self, device_id: &str) -> Result<bool>;

    async fn list_devices(&self) -> Result<Vec<String>>;

    async fn device_spec(&self, device_id: &str) -> Result<Option<DeviceSpec>>;

    /// Creates the device or replaces its calibration data.
    async fn upsert_device(&self, device_id: &str, spec: &DeviceSpec) -> Result<()>;
}

#[async_trait]
pub trait ThresholdRuleStore: Send + Sync {
    async fn rules(&self, device_id: &str) -> Result<Vec<ThresholdRule>>;

    async fn upsert_rule(&self, device_id: &str, rule: &ThresholdRule) -> Result<()>;

    /// Inserts only rules whose parameter has no row yet; returns how many were inserted.
    async fn insert_missing_rules(&self, device_id: &str, rules: &[ThresholdRule]) -> Result<u64>;
}

#[async_trait]
pub trait PredictionStore: Send + Sync {
    async fn insert_prediction(&self, prediction: &RuntimePrediction) -> Result<()>;

    async fn latest_prediction(
        &self,
        device_id: &str,
        subsystem: Subsystem,
    ) -> Result<Option<RuntimePrediction>>;

    /// Most recent unreconciled prediction with `from <= predicted_at <= to`.
    async fn latest_unreconciled(
        &self,
        device_id: &str,
        subsystem: Subsystem,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<RuntimePrediction>>;

    /// Writes the actual/error fields of an already stored prediction.
    async fn save_reconciliation(&self, prediction: &RuntimePrediction) -> Result<()>;

    async fn discard_unreconciled_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait CorrectionStore: Send + Sync {
    async fn correction(
        &self,
        device_id: &str,
        subsystem: Subsystem,
    ) -> Result<Option<CorrectionFactors>>;

    async fn corrections(&self, device_id: &str) -> Result<Vec<CorrectionFactors>>;

    async fn upsert_correction(&self, factors: &CorrectionFactors) -> Result<()>;
}

/// The set of ports the services share; usually all backed by one adapter.
#[derive(Clone)]
pub struct Stores {
    pub telemetry: Arc<dyn TelemetryStore>,
    pub devices: Arc<dyn DeviceRegistry>,
    pub rules: Arc<dyn ThresholdRuleStore>,
    pub predictions: Arc<dyn PredictionStore>,
    pub corrections: Arc<dyn CorrectionStore>,
}

impl Stores {
    pub fn from_adapter<S>(adapter: Arc<S>) -> Self
    where
        S: TelemetryStore
            + DeviceRegistry
            + ThresholdRuleStore
            + PredictionStore
            + CorrectionStore
            + 'static,
    {
        Self {
            telemetry: adapter.clone(),
            devices: adapter.clone(),
            rules: adapter.clone(),
            predictions: adapter.clone(),
            corrections: adapter,
        }
    }
}
