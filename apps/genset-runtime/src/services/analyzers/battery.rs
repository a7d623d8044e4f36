use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;

use super::window::{adaptive_steps, first_last_rate, latest_valid, max_of, RateCalc};
use super::AnalyzerConfig;
use crate::device::{BatteryClass, DeviceSpec};
use crate::services::prediction::types::RateSource;
use crate::store::{DeviceRegistry, TelemetryStore};
use crate::telemetry::TelemetrySnapshot;

const CURRENT_VOLTAGE_LOOKBACK_MINUTES: i64 = 5;
const CHARGING_WINDOW_MINUTES: i64 = 30;
const CHARGING_MIN_SNAPSHOTS: usize = 3;
/// Voltage steps at or below this are noise for charging detection.
const CHARGING_STEP_NOISE_V: f64 = 0.05;
const CLASS_DETECT_WINDOW_HOURS: i64 = 24;
const CHARGING_RISING_SHARE: f64 = 0.6;

fn voltage_reading(snapshot: &TelemetrySnapshot) -> Option<f64> {
    snapshot
        .battery_volts
        .filter(|volts| volts.is_finite() && *volts > 0.0)
}

/// Lead-acid state of charge, piecewise linear between the class's empty, half and full
/// points and clamped to 0..=100.
pub fn state_of_charge(voltage: f64, class: BatteryClass) -> f64 {
    let (full, half, empty) = (class.full_v(), class.half_v(), class.empty_v());
    if voltage >= full {
        return 100.0;
    }
    if voltage <= empty {
        return 0.0;
    }
    if voltage > half {
        50.0 + (voltage - half) / (full - half) * 50.0
    } else {
        (voltage - empty) / (half - empty) * 50.0
    }
}

#[derive(Clone)]
pub struct BatteryAnalyzer {
    telemetry: Arc<dyn TelemetryStore>,
    devices: Arc<dyn DeviceRegistry>,
    config: AnalyzerConfig,
}

impl BatteryAnalyzer {
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

    /// Drain in V/h over `[now - window, now]`. A stable voltage is no drain, so `None`.
    pub async fn current_rate(
        &self,
        device_id: &str,
        window: ChronoDuration,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        let snapshots = self.window(device_id, window, now).await?;
        let outcome =
            first_last_rate(&snapshots, &self.config.battery_policy(false), voltage_reading);
        Ok(match outcome {
            RateCalc::Rate(rate) => Some(rate),
            other => {
                tracing::debug!(device_id, ?other, "no battery drain rate for window");
                None
            }
        })
    }

    pub async fn rate_with_fallback(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(f64, RateSource)> {
        for step in adaptive_steps() {
            let snapshots = self.window(device_id, step.window, now).await?;
            let policy = self.config.battery_policy(step.relaxed);
            if let RateCalc::Rate(rate) = first_last_rate(&snapshots, &policy, voltage_reading) {
                if rate > 0.0 {
                    return Ok((rate, RateSource::Measured));
                }
            }
        }
        let estimate = self.estimate_rate();
        tracing::info!(device_id, rate = estimate, "using default battery drain rate");
        Ok((estimate, RateSource::Estimated))
    }

    /// Conservative fixed drain in V/h.
    pub fn estimate_rate(&self) -> f64 {
        self.config.default_battery_drain_v_per_hour
    }

    /// Most recent valid voltage from the last few minutes.
    pub async fn current_level(&self, device_id: &str, now: DateTime<Utc>) -> Result<Option<f64>> {
        let snapshots = self
            .window(
                device_id,
                ChronoDuration::minutes(CURRENT_VOLTAGE_LOOKBACK_MINUTES),
                now,
            )
            .await?;
        Ok(latest_valid(&snapshots, voltage_reading))
    }

    pub async fn spec(&self, device_id: &str) -> Result<Option<DeviceSpec>> {
        self.devices
            .device_spec(device_id)
            .await
            .with_context(|| format!("failed to load device spec for {device_id}"))
    }

    /// Configured class, else detected from the highest voltage seen over the last day.
    pub async fn battery_class(
        &self,
        device_id: &str,
        spec: Option<&DeviceSpec>,
        current_v: f64,
        now: DateTime<Utc>,
    ) -> Result<BatteryClass> {
        if spec.and_then(DeviceSpec::nominal_voltage).is_some() {
            return Ok(BatteryClass::resolve(spec, current_v));
        }
        let snapshots = self
            .window(device_id, ChronoDuration::hours(CLASS_DETECT_WINDOW_HOURS), now)
            .await?;
        let peak = max_of(&snapshots, voltage_reading).map_or(current_v, |v| v.max(current_v));
        Ok(BatteryClass::resolve(None, peak))
    }

    pub async fn current_soc(&self, device_id: &str, now: DateTime<Utc>) -> Result<Option<f64>> {
        let Some(voltage) = self.current_level(device_id, now).await? else {
            return Ok(None);
        };
        let spec = self.spec(device_id).await?;
        let class = self.battery_class(device_id, spec.as_ref(), voltage, now).await?;
        Ok(Some(state_of_charge(voltage, class)))
    }

    /// Remaining charge in Ah; needs a configured battery capacity.
    pub async fn remaining_capacity_ah(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        let Some(capacity) = self
            .spec(device_id)
            .await?
            .and_then(|spec| spec.battery_capacity_ah())
        else {
            return Ok(None);
        };
        Ok(self
            .current_soc(device_id, now)
            .await?
            .map(|soc| soc / 100.0 * capacity))
    }

    pub async fn is_charging(&self, device_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let snapshots = self
            .window(device_id, ChronoDuration::minutes(CHARGING_WINDOW_MINUTES), now)
            .await?;
        Ok(voltage_rising(&snapshots))
    }
}

fn voltage_rising(snapshots: &[TelemetrySnapshot]) -> bool {
    if snapshots.len() < CHARGING_MIN_SNAPSHOTS {
        return false;
    }
    let mut ordered: Vec<&TelemetrySnapshot> = snapshots.iter().collect();
    ordered.sort_by_key(|snapshot| snapshot.timestamp);

    let mut rising = 0usize;
    let mut counted = 0usize;
    for pair in ordered.windows(2) {
        let (Some(prev), Some(curr)) = (voltage_reading(pair[0]), voltage_reading(pair[1])) else {
            continue;
        };
        if (curr - prev).abs() > CHARGING_STEP_NOISE_V {
            counted += 1;
            if curr > prev {
                rising += 1;
            }
        }
    }
    counted > 0 && rising as f64 / counted as f64 > CHARGING_RISING_SHARE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, battery_series, seeded_store};

    fn analyzer(store: &Arc<crate::store::MemoryStore>) -> BatteryAnalyzer {
        BatteryAnalyzer::new(store.clone(), store.clone(), AnalyzerConfig::default())
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn soc_follows_lead_acid_breakpoints() {
        assert_eq!(state_of_charge(12.7, BatteryClass::V12), 100.0);
        assert_eq!(state_of_charge(12.2, BatteryClass::V12), 50.0);
        assert_eq!(state_of_charge(10.5, BatteryClass::V12), 0.0);
        assert!(approx(state_of_charge(12.45, BatteryClass::V12), 75.0));
        assert_eq!(state_of_charge(13.4, BatteryClass::V12), 100.0);
        assert_eq!(state_of_charge(9.0, BatteryClass::V12), 0.0);
        assert!(approx(state_of_charge(22.7, BatteryClass::V24), 25.0));
    }

    #[test]
    fn charging_needs_mostly_rising_steps() {
        let rising = battery_series(&[(0, 24.0), (10, 24.2), (20, 24.4), (25, 24.3)]);
        assert!(!voltage_rising(&rising[..2]));
        // Two of three counted steps rise.
        assert!(voltage_rising(&rising));

        let noisy = battery_series(&[(0, 24.0), (10, 24.03), (20, 24.06)]);
        assert!(!voltage_rising(&noisy));

        let falling = battery_series(&[(0, 24.4), (10, 24.2), (20, 24.3), (25, 24.0)]);
        assert!(!voltage_rising(&falling));
    }

    #[tokio::test]
    async fn drain_rate_requires_five_points_in_strict_window() {
        let store = seeded_store(
            "gen-1",
            None,
            battery_series(&[(0, 25.0), (30, 24.9), (60, 24.8), (90, 24.7), (120, 24.6)]),
        )
        .await;
        let analyzer = analyzer(&store);
        let rate = analyzer
            .current_rate("gen-1", ChronoDuration::hours(2), at(120))
            .await
            .unwrap()
            .unwrap();
        assert!(approx(rate, 0.2));
        assert_eq!(
            analyzer
                .current_rate("gen-1", ChronoDuration::hours(1), at(120))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn stable_voltage_is_no_drain_and_falls_back_to_estimate() {
        let store = seeded_store(
            "gen-1",
            None,
            battery_series(&[(0, 25.0), (30, 25.0), (60, 25.02), (90, 25.0), (120, 25.0)]),
        )
        .await;
        let analyzer = analyzer(&store);
        assert_eq!(
            analyzer
                .current_rate("gen-1", ChronoDuration::hours(2), at(120))
                .await
                .unwrap(),
            None
        );
        let (rate, source) = analyzer.rate_with_fallback("gen-1", at(120)).await.unwrap();
        assert_eq!(rate, 0.5);
        assert_eq!(source, RateSource::Estimated);
    }

    #[tokio::test]
    async fn soc_and_remaining_capacity_use_spec_or_auto_detection() {
        let store = seeded_store(
            "gen-1",
            Some(DeviceSpec {
                battery_capacity_ah: Some(200.0),
                ..Default::default()
            }),
            battery_series(&[(0, 24.9), (3, 24.9)]),
        )
        .await;
        let analyzer = analyzer(&store);
        let soc = analyzer.current_soc("gen-1", at(4)).await.unwrap().unwrap();
        assert!(approx(soc, 75.0));
        let remaining = analyzer
            .remaining_capacity_ah("gen-1", at(4))
            .await
            .unwrap()
            .unwrap();
        assert!(approx(remaining, 150.0));
        // Nothing in the last five minutes.
        assert_eq!(analyzer.current_level("gen-1", at(30)).await.unwrap(), None);
    }
}
