use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod types;

use crate::error::{CoreError, CoreResult};
use crate::services::analyzers::{
    liters_per_hour, state_of_charge, AnalyzerConfig, BatteryAnalyzer, FuelAnalyzer,
};
use crate::services::correction::CorrectionFactors;
use crate::services::device_locks::DeviceLocks;
use crate::store::Stores;
use types::{
    Forecast, PredictionCycleReport, RateSource, RuntimePrediction, Subsystem, SubsystemOutcome,
    UnavailableReason,
};

const LOAD_WINDOW_HOURS: i64 = 1;
/// Depletion timestamps are capped this far out.
const MAX_HORIZON_HOURS: f64 = 24.0 * 365.0 * 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Unreconciled predictions older than this are never matched and get discarded.
    #[serde(default = "default_reconcile_window_days")]
    pub reconcile_window_days: i64,
    #[serde(default = "default_estimated_confidence_factor")]
    pub estimated_confidence_factor: f64,
}

fn default_learning_rate() -> f64 {
    0.3
}

fn default_reconcile_window_days() -> i64 {
    7
}

fn default_estimated_confidence_factor() -> f64 {
    0.7
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            reconcile_window_days: default_reconcile_window_days(),
            estimated_confidence_factor: default_estimated_confidence_factor(),
        }
    }
}

impl PredictionConfig {
    pub fn validate(&self) -> Result<()> {
        let unit_interval = |value: f64| value.is_finite() && value > 0.0 && value <= 1.0;
        if !unit_interval(self.learning_rate) {
            anyhow::bail!("learning rate must be in (0, 1], got {}", self.learning_rate);
        }
        if !unit_interval(self.estimated_confidence_factor) {
            anyhow::bail!(
                "prediction.estimated_confidence_factor must be in (0, 1], got {}",
                self.estimated_confidence_factor
            );
        }
        if self.reconcile_window_days <= 0 {
            anyhow::bail!(
                "prediction.reconcile_window_days must be positive, got {}",
                self.reconcile_window_days
            );
        }
        Ok(())
    }
}

pub fn confidence(corrected_hours: f64, source: RateSource, estimated_factor: f64) -> f64 {
    let base = if corrected_hours < 1.0 {
        0.95
    } else if corrected_hours < 4.0 {
        0.85
    } else if corrected_hours < 8.0 {
        0.70
    } else {
        0.50
    };
    match source {
        RateSource::Measured => base,
        RateSource::Estimated => base * estimated_factor,
    }
}

fn add_hours(at: DateTime<Utc>, hours: f64) -> DateTime<Utc> {
    let millis = (hours.clamp(0.0, MAX_HORIZON_HOURS) * 3_600_000.0).round() as i64;
    at + ChronoDuration::milliseconds(millis)
}

/// Inputs shared by both subsystems once a level and rate are known.
struct Reading {
    subsystem: Subsystem,
    raw_runtime_hours: f64,
    rate: f64,
    rate_source: RateSource,
    fuel_level_percent: Option<f64>,
    battery_voltage: Option<f64>,
    battery_soc_percent: Option<f64>,
    fuel_burn_rate_liters_per_hour: Option<f64>,
}

#[derive(Clone)]
pub struct RuntimePredictionEngine {
    stores: Stores,
    locks: DeviceLocks,
    fuel: FuelAnalyzer,
    battery: BatteryAnalyzer,
    config: PredictionConfig,
}

impl RuntimePredictionEngine {
    pub fn new(
        stores: Stores,
        locks: DeviceLocks,
        analyzers: AnalyzerConfig,
        config: PredictionConfig,
    ) -> Self {
        let fuel = FuelAnalyzer::new(
            stores.telemetry.clone(),
            stores.devices.clone(),
            analyzers.clone(),
        );
        let battery = BatteryAnalyzer::new(
            stores.telemetry.clone(),
            stores.devices.clone(),
            analyzers,
        );
        Self {
            stores,
            locks,
            fuel,
            battery,
            config,
        }
    }

    pub fn fuel(&self) -> &FuelAnalyzer {
        &self.fuel
    }

    pub fn battery(&self) -> &BatteryAnalyzer {
        &self.battery
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

    /// Generator runtime from the current fuel level. Missing data is an error here; the
    /// cycle reports it as an unavailable outcome instead.
    pub async fn predict_generator(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<RuntimePrediction> {
        self.ensure_device(device_id).await?;
        let _guard = self.locks.acquire(device_id).await;
        match self.generator_locked(device_id, now).await? {
            Forecast::Predicted(prediction) => Ok(prediction),
            Forecast::Unavailable(reason) => {
                Err(CoreError::NoData(format!("{reason} for {device_id}")))
            }
        }
    }

    pub async fn predict_battery(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Forecast> {
        self.ensure_device(device_id).await?;
        let _guard = self.locks.acquire(device_id).await;
        Ok(self.battery_locked(device_id, now).await?)
    }

    /// Runs both subsystems under one hold of the device lock.
    pub async fn run_prediction_cycle(&self, device_id: &str) -> CoreResult<PredictionCycleReport> {
        self.ensure_device(device_id).await?;
        let _guard = self.locks.acquire(device_id).await;
        let now = Utc::now();

        let generator = outcome(
            device_id,
            Subsystem::Generator,
            self.generator_locked(device_id, now).await,
        );
        let battery = outcome(
            device_id,
            Subsystem::Battery,
            self.battery_locked(device_id, now).await,
        );

        Ok(PredictionCycleReport {
            device_id: device_id.to_string(),
            generator,
            battery,
        })
    }

    async fn generator_locked(&self, device_id: &str, now: DateTime<Utc>) -> Result<Forecast> {
        let Some(level) = self.fuel.current_level(device_id, now).await? else {
            return Ok(Forecast::Unavailable(UnavailableReason::NoFuelReading));
        };
        let (rate, rate_source) = self.fuel.rate_with_fallback(device_id, now).await?;
        if !(rate.is_finite() && rate > 0.0) {
            return Ok(Forecast::Unavailable(UnavailableReason::NoUsableRate));
        }
        let spec = self.fuel.spec(device_id).await?;

        let reading = Reading {
            subsystem: Subsystem::Generator,
            raw_runtime_hours: level / rate,
            rate,
            rate_source,
            fuel_level_percent: Some(level),
            battery_voltage: None,
            battery_soc_percent: None,
            fuel_burn_rate_liters_per_hour: liters_per_hour(rate, &spec),
        };
        self.finish(device_id, reading, now).await.map(Forecast::Predicted)
    }

    async fn battery_locked(&self, device_id: &str, now: DateTime<Utc>) -> Result<Forecast> {
        let Some(voltage) = self.battery.current_level(device_id, now).await? else {
            return Ok(Forecast::Unavailable(UnavailableReason::NoVoltageReading));
        };
        if self.battery.is_charging(device_id, now).await? {
            return Ok(Forecast::Unavailable(UnavailableReason::Charging));
        }
        let spec = self.battery.spec(device_id).await?;
        let class = self
            .battery
            .battery_class(device_id, spec.as_ref(), voltage, now)
            .await?;
        let minimum = class.empty_v();
        if voltage <= minimum {
            return Ok(Forecast::Unavailable(UnavailableReason::AtMinimumVoltage));
        }
        let (rate, rate_source) = self.battery.rate_with_fallback(device_id, now).await?;
        if !(rate.is_finite() && rate > 0.0) {
            return Ok(Forecast::Unavailable(UnavailableReason::NoUsableRate));
        }

        let reading = Reading {
            subsystem: Subsystem::Battery,
            raw_runtime_hours: (voltage - minimum) / rate,
            rate,
            rate_source,
            fuel_level_percent: None,
            battery_voltage: Some(voltage),
            battery_soc_percent: Some(state_of_charge(voltage, class)),
            fuel_burn_rate_liters_per_hour: None,
        };
        self.finish(device_id, reading, now).await.map(Forecast::Predicted)
    }

    /// Applies the learned factor, scores confidence and persists the prediction.
    async fn finish(
        &self,
        device_id: &str,
        reading: Reading,
        now: DateTime<Utc>,
    ) -> Result<RuntimePrediction> {
        let mut factors = self
            .stores
            .corrections
            .correction(device_id, reading.subsystem)
            .await
            .context("failed to load correction factors")?
            .unwrap_or_else(|| {
                CorrectionFactors::new(device_id, reading.subsystem, self.config.learning_rate, now)
            });
        let avg_load_kw = self
            .fuel
            .average_load(device_id, ChronoDuration::hours(LOAD_WINDOW_HOURS), now)
            .await?;

        let corrected = reading.raw_runtime_hours * factors.correction_factor;
        let prediction = RuntimePrediction {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            subsystem: reading.subsystem,
            predicted_at: now,
            fuel_level_percent: reading.fuel_level_percent,
            battery_voltage: reading.battery_voltage,
            battery_soc_percent: reading.battery_soc_percent,
            avg_load_kw,
            depletion_rate: reading.rate,
            rate_source: reading.rate_source,
            fuel_burn_rate_liters_per_hour: reading.fuel_burn_rate_liters_per_hour,
            raw_runtime_hours: reading.raw_runtime_hours,
            correction_factor: factors.correction_factor,
            predicted_runtime_hours: corrected,
            confidence: confidence(
                corrected,
                reading.rate_source,
                self.config.estimated_confidence_factor,
            ),
            predicted_depletion_at: add_hours(now, corrected),
            actual_runtime_hours: None,
            actual_depletion_at: None,
            error_hours: None,
            error_percent: None,
        };

        self.stores
            .predictions
            .insert_prediction(&prediction)
            .await
            .context("failed to store prediction")?;
        factors.prediction_count += 1;
        factors.updated_at = now;
        self.stores
            .corrections
            .upsert_correction(&factors)
            .await
            .context("failed to update prediction count")?;

        tracing::info!(
            device_id,
            subsystem = %prediction.subsystem,
            raw_hours = prediction.raw_runtime_hours,
            factor = prediction.correction_factor,
            hours = prediction.predicted_runtime_hours,
            confidence = prediction.confidence,
            rate_source = prediction.rate_source.as_str(),
            "runtime predicted"
        );
        Ok(prediction)
    }
}

fn outcome(device_id: &str, subsystem: Subsystem, result: Result<Forecast>) -> SubsystemOutcome {
    match result {
        Ok(Forecast::Predicted(prediction)) => SubsystemOutcome::Predicted(prediction),
        Ok(Forecast::Unavailable(reason)) => {
            tracing::info!(device_id, subsystem = %subsystem, "no prediction: {reason}");
            SubsystemOutcome::Unavailable { reason }
        }
        Err(err) => {
            tracing::warn!(device_id, subsystem = %subsystem, "prediction failed: {err:#}");
            SubsystemOutcome::Failed {
                error: format!("{err:#}"),
            }
        }
    }
}
