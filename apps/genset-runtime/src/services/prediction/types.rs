use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Generator,
    Battery,
}

impl Subsystem {
    pub const ALL: [Subsystem; 2] = [Subsystem::Generator, Subsystem::Battery];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generator => "generator",
            Self::Battery => "battery",
        }
    }

    /// Unit of the depletion rate recorded for this subsystem.
    pub fn rate_unit(self) -> &'static str {
        match self {
            Self::Generator => "%/h",
            Self::Battery => "V/h",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subsystem {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "generator" | "fuel" => Ok(Self::Generator),
            "battery" => Ok(Self::Battery),
            other => Err(format!("unknown subsystem: {other}")),
        }
    }
}

/// Whether a depletion rate was derived from history or from the fallback estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Measured,
    Estimated,
}

impl RateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Measured => "measured",
            Self::Estimated => "estimated",
        }
    }
}

impl FromStr for RateSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "measured" => Ok(Self::Measured),
            "estimated" => Ok(Self::Estimated),
            other => Err(format!("unknown rate source: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionStatus {
    PendingActual,
    Reconciled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimePrediction {
    pub id: Uuid,
    pub device_id: String,
    pub subsystem: Subsystem,
    pub predicted_at: DateTime<Utc>,

    pub fuel_level_percent: Option<f64>,
    pub battery_voltage: Option<f64>,
    pub battery_soc_percent: Option<f64>,
    pub avg_load_kw: Option<f64>,

    /// %/h for the generator, V/h for the battery.
    pub depletion_rate: f64,
    pub rate_source: RateSource,
    pub fuel_burn_rate_liters_per_hour: Option<f64>,

    pub raw_runtime_hours: f64,
    pub correction_factor: f64,
    pub predicted_runtime_hours: f64,
    pub confidence: f64,
    pub predicted_depletion_at: DateTime<Utc>,

    pub actual_runtime_hours: Option<f64>,
    pub actual_depletion_at: Option<DateTime<Utc>>,
    pub error_hours: Option<f64>,
    pub error_percent: Option<f64>,
}

impl RuntimePrediction {
    pub fn status(&self) -> PredictionStatus {
        if self.actual_depletion_at.is_some() {
            PredictionStatus::Reconciled
        } else {
            PredictionStatus::PendingActual
        }
    }

    pub fn rate_unit(&self) -> &'static str {
        self.subsystem.rate_unit()
    }
}

/// Why a subsystem produced no prediction this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    NoFuelReading,
    NoUsableRate,
    NoVoltageReading,
    Charging,
    AtMinimumVoltage,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoFuelReading => "no current fuel level reading",
            Self::NoUsableRate => "no usable depletion rate",
            Self::NoVoltageReading => "no current battery voltage reading",
            Self::Charging => "battery is charging",
            Self::AtMinimumVoltage => "battery is at or below minimum voltage",
        };
        f.write_str(text)
    }
}

/// Result of one subsystem prediction that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub enum Forecast {
    Predicted(RuntimePrediction),
    Unavailable(UnavailableReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubsystemOutcome {
    Predicted(RuntimePrediction),
    Unavailable { reason: UnavailableReason },
    Failed { error: String },
}

impl SubsystemOutcome {
    pub fn prediction(&self) -> Option<&RuntimePrediction> {
        match self {
            Self::Predicted(prediction) => Some(prediction),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionCycleReport {
    pub device_id: String,
    pub generator: SubsystemOutcome,
    pub battery: SubsystemOutcome,
}
