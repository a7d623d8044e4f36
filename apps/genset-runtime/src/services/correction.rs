use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::services::device_locks::DeviceLocks;
use crate::services::prediction::types::{RuntimePrediction, Subsystem};
use crate::services::prediction::PredictionConfig;
use crate::store::Stores;

/// Learned multiplier applied to raw runtime for one device subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionFactors {
    pub device_id: String,
    pub subsystem: Subsystem,
    pub correction_factor: f64,
    pub prediction_count: i64,
    pub actual_event_count: i64,
    pub avg_error_percent: Option<f64>,
    /// Events that carried an error value; the denominator of `avg_error_percent`.
    #[serde(default)]
    pub error_sample_count: i64,
    pub learning_rate: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl CorrectionFactors {
    pub fn new(
        device_id: &str,
        subsystem: Subsystem,
        learning_rate: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            subsystem,
            correction_factor: 1.0,
            prediction_count: 0,
            actual_event_count: 0,
            avg_error_percent: None,
            error_sample_count: 0,
            learning_rate: sanitize_learning_rate(learning_rate),
            created_at: now,
            updated_at: now,
            last_event_at: None,
        }
    }

    /// Folds one observed depletion into the factor and the error statistics. Returns
    /// whether the factor itself moved; the event is counted either way.
    pub fn record_event(
        &mut self,
        raw_runtime_hours: f64,
        actual_runtime_hours: f64,
        error_percent: Option<f64>,
        event_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut factor_updated = false;
        if raw_runtime_hours.is_finite() && raw_runtime_hours > 0.0 && actual_runtime_hours > 0.0 {
            let ratio = actual_runtime_hours / raw_runtime_hours;
            let next = ema(self.correction_factor, self.learning_rate, ratio);
            if next.is_finite() && next > 0.0 {
                self.correction_factor = next;
                factor_updated = true;
            }
        }

        if let Some(error) = error_percent.filter(|e| e.is_finite()).map(f64::abs) {
            self.avg_error_percent = Some(match self.avg_error_percent {
                Some(avg) if self.error_sample_count > 0 => {
                    let n = self.error_sample_count as f64;
                    (avg * n + error) / (n + 1.0)
                }
                _ => error,
            });
            self.error_sample_count += 1;
        }

        self.actual_event_count += 1;
        self.last_event_at = Some(event_at);
        self.updated_at = now;
        factor_updated
    }
}

pub fn ema(old: f64, learning_rate: f64, observed: f64) -> f64 {
    learning_rate * observed + (1.0 - learning_rate) * old
}

fn sanitize_learning_rate(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        value
    } else {
        0.3
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DepletionOutcome {
    Reconciled {
        prediction: RuntimePrediction,
        correction: CorrectionFactors,
        factor_updated: bool,
    },
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsystemAccuracy {
    pub correction_factor: f64,
    pub avg_error_percent: Option<f64>,
    pub prediction_count: i64,
    pub actual_event_count: i64,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl SubsystemAccuracy {
    fn neutral() -> Self {
        Self {
            correction_factor: 1.0,
            avg_error_percent: None,
            prediction_count: 0,
            actual_event_count: 0,
            last_event_at: None,
        }
    }
}

impl From<&CorrectionFactors> for SubsystemAccuracy {
    fn from(factors: &CorrectionFactors) -> Self {
        Self {
            correction_factor: factors.correction_factor,
            avg_error_percent: factors.avg_error_percent,
            prediction_count: factors.prediction_count,
            actual_event_count: factors.actual_event_count,
            last_event_at: factors.last_event_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyMetrics {
    pub device_id: String,
    pub generator: SubsystemAccuracy,
    pub battery: SubsystemAccuracy,
}

/// Reconciles stored predictions with observed depletions and learns from the error.
#[derive(Clone)]
pub struct CorrectionService {
    stores: Stores,
    locks: DeviceLocks,
    config: PredictionConfig,
}

impl CorrectionService {
    pub fn new(stores: Stores, locks: DeviceLocks, config: PredictionConfig) -> Self {
        Self {
            stores,
            locks,
            config,
        }
    }

    async fn ensure_device(&self, device_id: &str) -> CoreResult<()> {
        let exists = self
            .stores
            .devices
            .device_exists(device_id)
            .await
            .with_context(|| format!("failed to look up device {device_id}"))?;
        if !exists {
            return Err(CoreError::DeviceNotFound(device_id.to_string()));
        }
        Ok(())
    }

    pub async fn record_depletion_event(
        &self,
        device_id: &str,
        subsystem: Subsystem,
        actual_at: DateTime<Utc>,
    ) -> CoreResult<DepletionOutcome> {
        self.ensure_device(device_id).await?;
        let _guard = self.locks.acquire(device_id).await;

        let from = actual_at - ChronoDuration::days(self.config.reconcile_window_days);
        let matched = self
            .stores
            .predictions
            .latest_unreconciled(device_id, subsystem, from, actual_at)
            .await
            .context("failed to look up unreconciled predictions")?;
        let Some(mut prediction) = matched else {
            tracing::info!(
                device_id,
                subsystem = %subsystem,
                actual_at = %actual_at,
                "no unreconciled prediction matches depletion event"
            );
            return Ok(DepletionOutcome::NoMatch);
        };

        let actual_hours =
            (actual_at - prediction.predicted_at).num_milliseconds() as f64 / 3_600_000.0;
        let error_hours = actual_hours - prediction.predicted_runtime_hours;
        let error_percent = (actual_hours > 0.0).then(|| error_hours / actual_hours * 100.0);

        prediction.actual_runtime_hours = Some(actual_hours);
        prediction.actual_depletion_at = Some(actual_at);
        prediction.error_hours = Some(error_hours);
        prediction.error_percent = error_percent;
        self.stores
            .predictions
            .save_reconciliation(&prediction)
            .await
            .context("failed to save prediction reconciliation")?;

        let now = Utc::now();
        let mut correction = self
            .stores
            .corrections
            .correction(device_id, subsystem)
            .await
            .context("failed to load correction factors")?
            .unwrap_or_else(|| {
                CorrectionFactors::new(device_id, subsystem, self.config.learning_rate, now)
            });
        let previous = correction.correction_factor;
        let factor_updated = correction.record_event(
            prediction.raw_runtime_hours,
            actual_hours,
            error_percent,
            actual_at,
            now,
        );
        self.stores
            .corrections
            .upsert_correction(&correction)
            .await
            .context("failed to save correction factors")?;

        if factor_updated {
            tracing::info!(
                device_id,
                subsystem = %subsystem,
                previous,
                factor = correction.correction_factor,
                error_percent = ?error_percent,
                "correction factor updated"
            );
        } else {
            tracing::warn!(
                device_id,
                subsystem = %subsystem,
                raw_runtime_hours = prediction.raw_runtime_hours,
                actual_hours,
                "depletion event recorded without factor update"
            );
        }

        Ok(DepletionOutcome::Reconciled {
            prediction,
            correction,
            factor_updated,
        })
    }

    pub async fn latest_prediction(
        &self,
        device_id: &str,
        subsystem: Subsystem,
    ) -> CoreResult<Option<RuntimePrediction>> {
        self.ensure_device(device_id).await?;
        Ok(self
            .stores
            .predictions
            .latest_prediction(device_id, subsystem)
            .await
            .context("failed to load latest prediction")?)
    }

    pub async fn accuracy_metrics(&self, device_id: &str) -> CoreResult<AccuracyMetrics> {
        self.ensure_device(device_id).await?;
        let rows = self
            .stores
            .corrections
            .corrections(device_id)
            .await
            .context("failed to load correction factors")?;
        let pick = |subsystem: Subsystem| {
            rows.iter()
                .find(|row| row.subsystem == subsystem)
                .map(SubsystemAccuracy::from)
                .unwrap_or_else(SubsystemAccuracy::neutral)
        };
        Ok(AccuracyMetrics {
            device_id: device_id.to_string(),
            generator: pick(Subsystem::Generator),
            battery: pick(Subsystem::Battery),
        })
    }
}
