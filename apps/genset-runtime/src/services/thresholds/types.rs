use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::telemetry::Field;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThresholdParameter {
    Rpm,
    GeneratorFrequency,
    MainsBusFrequency,
    GeneratorVoltageLn,
    GeneratorVoltageLl,
    MainsBusVoltageLn,
    MainsBusVoltageLl,
    GeneratorCurrent,
    RealPower,
    ReactivePower,
    PowerFactor,
    EarthFaultCurrent,
    Rocof,
    OilPressure,
    OilTemperature,
    FuelLevel,
    BatteryVoltage,
    EStop,
}

/// Where a checked value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Reading(Field),
    /// Mean of whichever of the listed readings are present.
    Mean(&'static [Field]),
}

/// One physical value backing a logical parameter, plus the label used in alarm text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub source: Source,
    pub label: &'static str,
}

const fn probe(field: Field, label: &'static str) -> Probe {
    Probe {
        source: Source::Reading(field),
        label,
    }
}

const GENERATOR_PHASE_POWER: &[Field] =
    &[Field::GeneratorPL1, Field::GeneratorPL2, Field::GeneratorPL3];

const RPM: &[Probe] = &[probe(Field::Rpm, "")];
const GENERATOR_FREQUENCY: &[Probe] = &[probe(Field::GeneratorFrequency, "")];
const MAINS_BUS_FREQUENCY: &[Probe] = &[probe(Field::MainsBusFrequency, "")];
const GENERATOR_VOLTAGE_LN: &[Probe] = &[
    probe(Field::GeneratorVoltageL1N, "L1-N"),
    probe(Field::GeneratorVoltageL2N, "L2-N"),
    probe(Field::GeneratorVoltageL3N, "L3-N"),
];
const GENERATOR_VOLTAGE_LL: &[Probe] = &[
    probe(Field::GeneratorVoltageL1L2, "L1-L2"),
    probe(Field::GeneratorVoltageL2L3, "L2-L3"),
    probe(Field::GeneratorVoltageL3L1, "L3-L1"),
];
const MAINS_BUS_VOLTAGE_LN: &[Probe] = &[
    probe(Field::MainsBusVoltageL1N, "L1-N"),
    probe(Field::MainsBusVoltageL2N, "L2-N"),
    probe(Field::MainsBusVoltageL3N, "L3-N"),
];
const MAINS_BUS_VOLTAGE_LL: &[Probe] = &[
    probe(Field::MainsBusVoltageL1L2, "L1-L2"),
    probe(Field::MainsBusVoltageL2L3, "L2-L3"),
    probe(Field::MainsBusVoltageL3L1, "L3-L1"),
];
const GENERATOR_CURRENT: &[Probe] = &[
    probe(Field::GeneratorCurrentL1, "L1"),
    probe(Field::GeneratorCurrentL2, "L2"),
    probe(Field::GeneratorCurrentL3, "L3"),
];
const REAL_POWER: &[Probe] = &[
    Probe {
        source: Source::Mean(GENERATOR_PHASE_POWER),
        label: "(Generator)",
    },
    probe(Field::LoadP, "(Load)"),
];
const REACTIVE_POWER: &[Probe] = &[
    probe(Field::GeneratorQ, "(Generator)"),
    probe(Field::LoadQ, "(Load)"),
];
const POWER_FACTOR: &[Probe] = &[
    probe(Field::GeneratorPowerFactor, "(Generator)"),
    probe(Field::MainsPf, "(Mains)"),
    probe(Field::LoadPf, "(Load)"),
];
const EARTH_FAULT_CURRENT: &[Probe] = &[probe(Field::EarthFaultCurrent, "")];
const ROCOF: &[Probe] = &[probe(Field::Rocof, ""), probe(Field::MaxRocof, "(Max)")];
const OIL_PRESSURE: &[Probe] = &[probe(Field::OilPressure, "")];
const OIL_TEMPERATURE: &[Probe] = &[probe(Field::OilTemperature, "")];
const FUEL_LEVEL: &[Probe] = &[probe(Field::FuelLevel, "")];
const BATTERY_VOLTAGE: &[Probe] = &[
    probe(Field::BatteryVolts, "(Battery)"),
    probe(Field::DPlus, "(D+)"),
];
const E_STOP: &[Probe] = &[probe(Field::EStop, "")];

impl ThresholdParameter {
    pub const ALL: [ThresholdParameter; 18] = [
        Self::Rpm,
        Self::GeneratorFrequency,
        Self::MainsBusFrequency,
        Self::GeneratorVoltageLn,
        Self::GeneratorVoltageLl,
        Self::MainsBusVoltageLn,
        Self::MainsBusVoltageLl,
        Self::GeneratorCurrent,
        Self::RealPower,
        Self::ReactivePower,
        Self::PowerFactor,
        Self::EarthFaultCurrent,
        Self::Rocof,
        Self::OilPressure,
        Self::OilTemperature,
        Self::FuelLevel,
        Self::BatteryVoltage,
        Self::EStop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rpm => "RPM",
            Self::GeneratorFrequency => "GENERATOR_FREQUENCY",
            Self::MainsBusFrequency => "MAINS_BUS_FREQUENCY",
            Self::GeneratorVoltageLn => "GENERATOR_VOLTAGE_LN",
            Self::GeneratorVoltageLl => "GENERATOR_VOLTAGE_LL",
            Self::MainsBusVoltageLn => "MAINS_BUS_VOLTAGE_LN",
            Self::MainsBusVoltageLl => "MAINS_BUS_VOLTAGE_LL",
            Self::GeneratorCurrent => "GENERATOR_CURRENT",
            Self::RealPower => "REAL_POWER",
            Self::ReactivePower => "REACTIVE_POWER",
            Self::PowerFactor => "POWER_FACTOR",
            Self::EarthFaultCurrent => "EARTH_FAULT_CURRENT",
            Self::Rocof => "ROCOF",
            Self::OilPressure => "OIL_PRESSURE",
            Self::OilTemperature => "OIL_TEMPERATURE",
            Self::FuelLevel => "FUEL_LEVEL",
            Self::BatteryVoltage => "BATTERY_VOLTAGE",
            Self::EStop => "E_STOP",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Rpm => "RPM",
            Self::GeneratorFrequency => "Generator Frequency",
            Self::MainsBusFrequency => "Mains/Bus Frequency",
            Self::GeneratorVoltageLn => "Generator Voltage L-N",
            Self::GeneratorVoltageLl => "Generator Voltage L-L",
            Self::MainsBusVoltageLn => "Mains/Bus Voltage L-N",
            Self::MainsBusVoltageLl => "Mains/Bus Voltage L-L",
            Self::GeneratorCurrent => "Generator Current",
            Self::RealPower => "Real Power (P)",
            Self::ReactivePower => "Reactive Power (Q)",
            Self::PowerFactor => "Power Factor",
            Self::EarthFaultCurrent => "Earth Fault Current",
            Self::Rocof => "ROCOF",
            Self::OilPressure => "Oil Pressure",
            Self::OilTemperature => "Oil Temperature",
            Self::FuelLevel => "Fuel Level",
            Self::BatteryVoltage => "Battery Voltage",
            Self::EStop => "E-STOP",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::Rpm => "rpm",
            Self::GeneratorFrequency | Self::MainsBusFrequency => "Hz",
            Self::GeneratorVoltageLn
            | Self::GeneratorVoltageLl
            | Self::MainsBusVoltageLn
            | Self::MainsBusVoltageLl
            | Self::BatteryVoltage => "V",
            Self::GeneratorCurrent | Self::EarthFaultCurrent => "A",
            Self::RealPower => "kW",
            Self::ReactivePower => "kVAr",
            Self::PowerFactor | Self::EStop => "",
            Self::Rocof => "Hz/s",
            Self::OilPressure => "Bar",
            Self::OilTemperature => "°C",
            Self::FuelLevel => "%",
        }
    }

    /// Readings checked for this parameter, each against the same bounds.
    pub fn probes(self) -> &'static [Probe] {
        match self {
            Self::Rpm => RPM,
            Self::GeneratorFrequency => GENERATOR_FREQUENCY,
            Self::MainsBusFrequency => MAINS_BUS_FREQUENCY,
            Self::GeneratorVoltageLn => GENERATOR_VOLTAGE_LN,
            Self::GeneratorVoltageLl => GENERATOR_VOLTAGE_LL,
            Self::MainsBusVoltageLn => MAINS_BUS_VOLTAGE_LN,
            Self::MainsBusVoltageLl => MAINS_BUS_VOLTAGE_LL,
            Self::GeneratorCurrent => GENERATOR_CURRENT,
            Self::RealPower => REAL_POWER,
            Self::ReactivePower => REACTIVE_POWER,
            Self::PowerFactor => POWER_FACTOR,
            Self::EarthFaultCurrent => EARTH_FAULT_CURRENT,
            Self::Rocof => ROCOF,
            Self::OilPressure => OIL_PRESSURE,
            Self::OilTemperature => OIL_TEMPERATURE,
            Self::FuelLevel => FUEL_LEVEL,
            Self::BatteryVoltage => BATTERY_VOLTAGE,
            Self::EStop => E_STOP,
        }
    }

    /// Registration-time bounds `(min, max)`.
    pub fn default_bounds(self) -> (f64, f64) {
        match self {
            Self::Rpm => (1400.0, 1600.0),
            Self::GeneratorFrequency | Self::MainsBusFrequency => (49.0, 51.0),
            Self::GeneratorVoltageLn | Self::MainsBusVoltageLn => (200.0, 250.0),
            Self::GeneratorVoltageLl | Self::MainsBusVoltageLl => (380.0, 420.0),
            Self::GeneratorCurrent => (0.0, 100.0),
            Self::RealPower => (0.0, 500.0),
            Self::ReactivePower => (-100.0, 100.0),
            Self::PowerFactor => (0.8, 1.0),
            Self::EarthFaultCurrent => (0.0, 1.0),
            Self::Rocof => (-2.0, 2.0),
            Self::OilPressure => (2.0, 6.0),
            Self::OilTemperature => (0.0, 120.0),
            Self::FuelLevel => (10.0, 100.0),
            Self::BatteryVoltage => (22.0, 28.0),
            // Any activation is out of range.
            Self::EStop => (0.0, 0.0),
        }
    }
}

impl fmt::Display for ThresholdParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThresholdParameter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        Self::ALL
            .into_iter()
            .find(|parameter| parameter.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown threshold parameter: {wanted}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub parameter: ThresholdParameter,
    pub min_value: f64,
    pub max_value: f64,
    #[serde(default)]
    pub unit: String,
}

impl ThresholdRule {
    pub fn new(parameter: ThresholdParameter, min_value: f64, max_value: f64) -> Self {
        Self {
            parameter,
            min_value,
            max_value,
            unit: parameter.unit().to_string(),
        }
    }

    pub fn with_defaults(parameter: ThresholdParameter) -> Self {
        let (min_value, max_value) = parameter.default_bounds();
        Self::new(parameter, min_value, max_value)
    }
}

/// The full default rule set a newly registered device receives.
pub fn default_rules() -> Vec<ThresholdRule> {
    ThresholdParameter::ALL
        .into_iter()
        .map(ThresholdRule::with_defaults)
        .collect()
}

pub fn validate_bounds(min_value: f64, max_value: f64) -> Result<(), String> {
    if !min_value.is_finite() || !max_value.is_finite() {
        return Err("threshold bounds must be finite".to_string());
    }
    if min_value > max_value {
        return Err(format!(
            "min_value ({min_value}) must be <= max_value ({max_value})"
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Below the minimum.
    Warning,
    /// Above the maximum.
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub device_id: String,
    pub parameter: ThresholdParameter,
    pub message: String,
    pub severity: Severity,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// A stored rule that cannot be evaluated as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MisconfiguredRule {
    pub parameter: ThresholdParameter,
    pub min_value: f64,
    pub max_value: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdReport {
    pub alarms: Vec<Alarm>,
    pub misconfigured: Vec<MisconfiguredRule>,
}
