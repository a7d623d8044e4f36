//! Depletion-rate analyzers over stored telemetry history.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

mod battery;
mod fuel;
pub mod window;

pub use battery::{state_of_charge, BatteryAnalyzer};
pub use fuel::{liters_per_hour, FuelAnalyzer};

use window::RatePolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_fuel_min_points")]
    pub fuel_min_points: usize,
    #[serde(default = "default_fuel_min_change_percent")]
    pub fuel_min_change_percent: f64,
    #[serde(default = "default_battery_min_points")]
    pub battery_min_points: usize,
    #[serde(default = "default_battery_min_change_v")]
    pub battery_min_change_v: f64,
    #[serde(default = "default_min_elapsed_hours")]
    pub min_elapsed_hours: f64,
    #[serde(default = "default_relaxed_min_points")]
    pub relaxed_min_points: usize,
    #[serde(default = "default_relaxed_min_change")]
    pub relaxed_min_change: f64,
    #[serde(default = "default_relaxed_min_elapsed_hours")]
    pub relaxed_min_elapsed_hours: f64,
    /// Full-load fuel consumption used by the estimate, in % of tank per hour.
    #[serde(default = "default_base_fuel_rate_percent_per_hour")]
    pub base_fuel_rate_percent_per_hour: f64,
    #[serde(default = "default_min_estimated_fuel_rate")]
    pub min_estimated_fuel_rate: f64,
    #[serde(default = "default_max_estimated_fuel_rate")]
    pub max_estimated_fuel_rate: f64,
    #[serde(default = "default_load_kw")]
    pub default_load_kw: f64,
    #[serde(default = "default_battery_drain_v_per_hour")]
    pub default_battery_drain_v_per_hour: f64,
}

fn default_fuel_min_points() -> usize {
    3
}

fn default_fuel_min_change_percent() -> f64 {
    0.2
}

fn default_battery_min_points() -> usize {
    5
}

fn default_battery_min_change_v() -> f64 {
    0.1
}

fn default_min_elapsed_hours() -> f64 {
    0.1
}

fn default_relaxed_min_points() -> usize {
    2
}

fn default_relaxed_min_change() -> f64 {
    0.1
}

fn default_relaxed_min_elapsed_hours() -> f64 {
    0.05
}

fn default_base_fuel_rate_percent_per_hour() -> f64 {
    10.0
}

fn default_min_estimated_fuel_rate() -> f64 {
    1.0
}

fn default_max_estimated_fuel_rate() -> f64 {
    15.0
}

fn default_load_kw() -> f64 {
    100.0
}

fn default_battery_drain_v_per_hour() -> f64 {
    0.5
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fuel_min_points: default_fuel_min_points(),
            fuel_min_change_percent: default_fuel_min_change_percent(),
            battery_min_points: default_battery_min_points(),
            battery_min_change_v: default_battery_min_change_v(),
            min_elapsed_hours: default_min_elapsed_hours(),
            relaxed_min_points: default_relaxed_min_points(),
            relaxed_min_change: default_relaxed_min_change(),
            relaxed_min_elapsed_hours: default_relaxed_min_elapsed_hours(),
            base_fuel_rate_percent_per_hour: default_base_fuel_rate_percent_per_hour(),
            min_estimated_fuel_rate: default_min_estimated_fuel_rate(),
            max_estimated_fuel_rate: default_max_estimated_fuel_rate(),
            default_load_kw: default_load_kw(),
            default_battery_drain_v_per_hour: default_battery_drain_v_per_hour(),
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("fuel_min_points", self.fuel_min_points),
            ("battery_min_points", self.battery_min_points),
            ("relaxed_min_points", self.relaxed_min_points),
        ] {
            if value == 0 {
                bail!("analyzer.{name} must be positive");
            }
        }
        for (name, value) in [
            ("fuel_min_change_percent", self.fuel_min_change_percent),
            ("battery_min_change_v", self.battery_min_change_v),
            ("relaxed_min_change", self.relaxed_min_change),
            ("min_elapsed_hours", self.min_elapsed_hours),
            ("relaxed_min_elapsed_hours", self.relaxed_min_elapsed_hours),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                bail!("analyzer.{name} must not be negative, got {value}");
            }
        }
        for (name, value) in [
            ("base_fuel_rate_percent_per_hour", self.base_fuel_rate_percent_per_hour),
            ("min_estimated_fuel_rate", self.min_estimated_fuel_rate),
            ("max_estimated_fuel_rate", self.max_estimated_fuel_rate),
            ("default_load_kw", self.default_load_kw),
            ("default_battery_drain_v_per_hour", self.default_battery_drain_v_per_hour),
        ] {
            if !(value.is_finite() && value > 0.0) {
                bail!("analyzer.{name} must be positive, got {value}");
            }
        }
        if self.min_estimated_fuel_rate > self.max_estimated_fuel_rate {
            bail!(
                "analyzer.min_estimated_fuel_rate ({}) exceeds max_estimated_fuel_rate ({})",
                self.min_estimated_fuel_rate,
                self.max_estimated_fuel_rate
            );
        }
        Ok(())
    }

    fn fuel_policy(&self, relaxed: bool) -> RatePolicy {
        if relaxed {
            return self.relaxed_policy();
        }
        RatePolicy {
            min_points: self.fuel_min_points,
            min_change: self.fuel_min_change_percent,
            min_elapsed_hours: self.min_elapsed_hours,
        }
    }

    fn battery_policy(&self, relaxed: bool) -> RatePolicy {
        if relaxed {
            return self.relaxed_policy();
        }
        RatePolicy {
            min_points: self.battery_min_points,
            min_change: self.battery_min_change_v,
            min_elapsed_hours: self.min_elapsed_hours,
        }
    }

    fn relaxed_policy(&self) -> RatePolicy {
        RatePolicy {
            min_points: self.relaxed_min_points,
            min_change: self.relaxed_min_change,
            min_elapsed_hours: self.relaxed_min_elapsed_hours,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: AnalyzerConfig =
            serde_json::from_value(serde_json::json!({ "fuel_min_points": 6 })).unwrap();
        assert_eq!(config.fuel_min_points, 6);
        assert_eq!(config.battery_min_points, 5);
        assert_eq!(config.default_battery_drain_v_per_hour, 0.5);
    }
}
