use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;

use super::window::{adaptive_steps, first_last_rate, latest_valid, mean_of, RateCalc};
use super::AnalyzerConfig;
use crate::device::DeviceSpec;
use crate::services::prediction::types::RateSource;
use crate::store::{DeviceRegistry, TelemetryStore};
use crate::telemetry::TelemetrySnapshot;

/// Windows searched, in order, for a current fuel level.
const LEVEL_LOOKBACK_MINUTES: [i64; 3] = [5, 15, 60];
const ESTIMATE_LOAD_WINDOW_HOURS: i64 = 1;
/// Share of rated capacity assumed when no load has been observed.
const ASSUMED_LOAD_SHARE: f64 = 0.5;
const UNKNOWN_CAPACITY_LOAD_FACTOR: f64 = 0.5;

fn fuel_reading(snapshot: &TelemetrySnapshot) -> Option<f64> {
    snapshot
        .fuel_level
        .filter(|level| level.is_finite() && (0.0..=100.0).contains(level))
}

#[derive(Clone)]
pub struct FuelAnalyzer {
    telemetry: Arc<dyn TelemetryStore>,
    devices: Arc<dyn DeviceRegistry>,
    config: AnalyzerConfig,
}

impl FuelAnalyzer {
    pub fn new(
        telemetry: Arc<dyn TelemetryStore>,
        devices: Arc<dyn DeviceRegistry>,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            telemetry,
            devices,
            config,
        }
    }

    async fn window(
        &self,
        device_id: &str,
        window: ChronoDuration,
        now: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySnapshot>> {
        self.telemetry
            .snapshots(device_id, now - window, now)
            .await
            .with_context(|| format!("failed to load telemetry for {device_id}"))
    }

    /// Burn rate in %/h over `[now - window, now]` using the strict policy. A stable level
    /// reads as 0; refuels, sparse or short windows give `None`.
    pub async fn current_rate(
        &self,
        device_id: &str,
        window: ChronoDuration,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        let snapshots = self.window(device_id, window, now).await?;
        let outcome = first_last_rate(&snapshots, &self.config.fuel_policy(false), fuel_reading);
        Ok(match outcome {
            RateCalc::Rate(rate) => Some(rate),
            RateCalc::Stable => Some(0.0),
            other => {
                tracing::debug!(device_id, ?other, "no fuel burn rate for window");
                None
            }
        })
    }

    /// First strictly positive rate along the adaptive window chain, else the estimate.
    pub async fn rate_with_fallback(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(f64, RateSource)> {
        for step in adaptive_steps() {
            let snapshots = self.window(device_id, step.window, now).await?;
            let policy = self.config.fuel_policy(step.relaxed);
            if let RateCalc::Rate(rate) = first_last_rate(&snapshots, &policy, fuel_reading) {
                if rate > 0.0 {
                    tracing::debug!(
                        device_id,
                        window_minutes = step.window.num_minutes(),
                        rate,
                        "fuel burn rate measured"
                    );
                    return Ok((rate, RateSource::Measured));
                }
            }
        }

        let estimate = self.estimate_rate(device_id, now).await?;
        tracing::info!(device_id, rate = estimate, "using estimated fuel burn rate");
        Ok((estimate, RateSource::Estimated))
    }

    /// Load-scaled fallback rate in %/h. Always returns a value.
    pub async fn estimate_rate(&self, device_id: &str, now: DateTime<Utc>) -> Result<f64> {
        let spec = self.spec(device_id).await?;
        let capacity_kw = spec.generator_capacity_kw();
        let observed = self
            .average_load(device_id, ChronoDuration::hours(ESTIMATE_LOAD_WINDOW_HOURS), now)
            .await?;
        Ok(estimate_from_load(&self.config, observed, capacity_kw))
    }

    /// Mean over the window of each snapshot's summed positive phase power, in kW.
    pub async fn average_load(
        &self,
        device_id: &str,
        window: ChronoDuration,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        let snapshots = self.window(device_id, window, now).await?;
        Ok(mean_of(&snapshots, TelemetrySnapshot::generator_load_kw))
    }

    /// Most recent valid fuel level, searching progressively wider windows.
    pub async fn current_level(&self, device_id: &str, now: DateTime<Utc>) -> Result<Option<f64>> {
        for minutes in LEVEL_LOOKBACK_MINUTES {
            let snapshots = self
                .window(device_id, ChronoDuration::minutes(minutes), now)
                .await?;
            if let Some(level) = latest_valid(&snapshots, fuel_reading) {
                return Ok(Some(level));
            }
        }
        Ok(None)
    }

    pub async fn spec(&self, device_id: &str) -> Result<DeviceSpec> {
        Ok(self
            .devices
            .device_spec(device_id)
            .await
            .with_context(|| format!("failed to load device spec for {device_id}"))?
            .unwrap_or_default())
    }
}

fn estimate_from_load(
    config: &AnalyzerConfig,
    observed_kw: Option<f64>,
    capacity_kw: Option<f64>,
) -> f64 {
    let load_kw = observed_kw.unwrap_or_else(|| match capacity_kw {
        Some(capacity) => capacity * ASSUMED_LOAD_SHARE,
        None => config.default_load_kw,
    });
    let load_factor = match capacity_kw {
        Some(capacity) => load_kw / capacity,
        None => UNKNOWN_CAPACITY_LOAD_FACTOR,
    };
    (config.base_fuel_rate_percent_per_hour * load_factor)
        .clamp(config.min_estimated_fuel_rate, config.max_estimated_fuel_rate)
}

/// Liters per hour for a %/h rate, when the tank size is known.
pub fn liters_per_hour(rate_percent_per_hour: f64, spec: &DeviceSpec) -> Option<f64> {
    spec.tank_capacity_liters()
        .map(|tank| tank * rate_percent_per_hour / 100.0)
}
