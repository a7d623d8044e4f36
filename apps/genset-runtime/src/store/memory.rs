use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
#[cfg(test)]
use uuid::Uuid;

use super::{CorrectionStore, DeviceRegistry, PredictionStore, TelemetryStore, ThresholdRuleStore};
use crate::device::DeviceSpec;
use crate::services::correction::CorrectionFactors;
use crate::services::prediction::types::{RuntimePrediction, Subsystem};
use crate::services::thresholds::types::{ThresholdParameter, ThresholdRule};
use crate::telemetry::TelemetrySnapshot;

#[derive(Default)]
struct Inner {
    devices: BTreeMap<String, DeviceSpec>,
    snapshots: HashMap<String, Vec<TelemetrySnapshot>>,
    rules: HashMap<String, BTreeMap<ThresholdParameter, ThresholdRule>>,
    predictions: Vec<RuntimePrediction>,
    corrections: HashMap<(String, Subsystem), CorrectionFactors>,
}

/// In-process adapter for every store port. Backs tests and database-less runs; nothing
/// survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    #[cfg(test)]
    pub fn prediction(&self, id: Uuid) -> Option<RuntimePrediction> {
        self.lock()
            .ok()?
            .predictions
            .iter()
            .find(|prediction| prediction.id == id)
            .cloned()
    }

    #[cfg(test)]
    pub fn snapshot_count(&self, device_id: &str) -> usize {
        self.lock()
            .map(|inner| inner.snapshots.get(device_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn snapshots(
        &self,
        device_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySnapshot>> {
        let inner = self.lock()?;
        let mut rows: Vec<TelemetrySnapshot> = inner
            .snapshots
            .get(device_id)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.timestamp >= start && row.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|row| row.timestamp);
        Ok(rows)
    }

    async fn insert_snapshot(&self, device_id: &str, snapshot: &TelemetrySnapshot) -> Result<()> {
        self.lock()?
            .snapshots
            .entry(device_id.to_string())
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    async fn prune_snapshots_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.lock()?;
        let mut removed = 0u64;
        for rows in inner.snapshots.values_mut() {
            let before = rows.len();
            rows.retain(|row| row.timestamp >= cutoff);
            removed += (before - rows.len()) as u64;
        }
        Ok(removed)
    }
}

#[async_trait]
impl DeviceRegistry for MemoryStore {
    async fn device_exists(&self, device_id: &str) -> Result<bool> {
        Ok(self.lock()?.devices.contains_key(device_id))
    }

    async fn list_devices(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.devices.keys().cloned().collect())
    }

    async fn device_spec(&self, device_id: &str) -> Result<Option<DeviceSpec>> {
        Ok(self.lock()?.devices.get(device_id).cloned())
    }

    async fn upsert_device(&self, device_id: &str, spec: &DeviceSpec) -> Result<()> {
        self.lock()?
            .devices
            .insert(device_id.to_string(), spec.clone());
        Ok(())
    }
}

#[async_trait]
impl ThresholdRuleStore for MemoryStore {
    async fn rules(&self, device_id: &str) -> Result<Vec<ThresholdRule>> {
        Ok(self
            .lock()?
            .rules
            .get(device_id)
            .map(|rules| rules.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_rule(&self, device_id: &str, rule: &ThresholdRule) -> Result<()> {
        self.lock()?
            .rules
            .entry(device_id.to_string())
            .or_default()
            .insert(rule.parameter, rule.clone());
        Ok(())
    }

    async fn insert_missing_rules(&self, device_id: &str, rules: &[ThresholdRule]) -> Result<u64> {
        let mut inner = self.lock()?;
        let existing = inner.rules.entry(device_id.to_string()).or_default();
        let mut inserted = 0u64;
        for rule in rules {
            if !existing.contains_key(&rule.parameter) {
                existing.insert(rule.parameter, rule.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

#[async_trait]
impl PredictionStore for MemoryStore {
    async fn insert_prediction(&self, prediction: &RuntimePrediction) -> Result<()> {
        self.lock()?.predictions.push(prediction.clone());
        Ok(())
    }

    async fn latest_prediction(
        &self,
        device_id: &str,
        subsystem: Subsystem,
    ) -> Result<Option<RuntimePrediction>> {
        Ok(self
            .lock()?
            .predictions
            .iter()
            .filter(|p| p.device_id == device_id && p.subsystem == subsystem)
            .max_by_key(|p| p.predicted_at)
            .cloned())
    }

    async fn latest_unreconciled(
        &self,
        device_id: &str,
        subsystem: Subsystem,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<RuntimePrediction>> {
        Ok(self
            .lock()?
            .predictions
            .iter()
            .filter(|p| {
                p.device_id == device_id
                    && p.subsystem == subsystem
                    && p.actual_depletion_at.is_none()
                    && p.predicted_at >= from
                    && p.predicted_at <= to
            })
            .max_by_key(|p| p.predicted_at)
            .cloned())
    }

    async fn save_reconciliation(&self, prediction: &RuntimePrediction) -> Result<()> {
        let mut inner = self.lock()?;
        let stored = inner
            .predictions
            .iter_mut()
            .find(|p| p.id == prediction.id)
            .ok_or_else(|| anyhow!("prediction {} not found", prediction.id))?;
        stored.actual_runtime_hours = prediction.actual_runtime_hours;
        stored.actual_depletion_at = prediction.actual_depletion_at;
        stored.error_hours = prediction.error_hours;
        stored.error_percent = prediction.error_percent;
        Ok(())
    }

    async fn discard_unreconciled_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.lock()?;
        let before = inner.predictions.len();
        inner
            .predictions
            .retain(|p| p.actual_depletion_at.is_some() || p.predicted_at >= cutoff);
        Ok((before - inner.predictions.len()) as u64)
    }
}

#[async_trait]
impl CorrectionStore for MemoryStore {
    async fn correction(
        &self,
        device_id: &str,
        subsystem: Subsystem,
    ) -> Result<Option<CorrectionFactors>> {
        Ok(self
            .lock()?
            .corrections
            .get(&(device_id.to_string(), subsystem))
            .cloned())
    }

    async fn corrections(&self, device_id: &str) -> Result<Vec<CorrectionFactors>> {
        let mut rows: Vec<CorrectionFactors> = self
            .lock()?
            .corrections
            .values()
            .filter(|row| row.device_id == device_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.subsystem);
        Ok(rows)
    }

    async fn upsert_correction(&self, factors: &CorrectionFactors) -> Result<()> {
        self.lock()?.corrections.insert(
            (factors.device_id.clone(), factors.subsystem),
            factors.clone(),
        );
        Ok(())
    }
}
