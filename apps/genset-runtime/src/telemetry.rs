use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reading set reported by a generator controller. Field names on the wire follow the
/// controller's register names; anything the controller sends that is not listed here is
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "RPM")]
    pub rpm: Option<f64>,

    #[serde(rename = "Generator_P_L1")]
    pub generator_p_l1: Option<f64>,
    #[serde(rename = "Generator_P_L2")]
    pub generator_p_l2: Option<f64>,
    #[serde(rename = "Generator_P_L3")]
    pub generator_p_l3: Option<f64>,
    #[serde(rename = "Generator_Q")]
    pub generator_q: Option<f64>,
    #[serde(rename = "Generator_Power_Factor")]
    pub generator_power_factor: Option<f64>,
    #[serde(rename = "Generator_Frequency")]
    pub generator_frequency: Option<f64>,

    #[serde(rename = "Generator_Voltage_L1_N")]
    pub generator_voltage_l1_n: Option<f64>,
    #[serde(rename = "Generator_Voltage_L2_N")]
    pub generator_voltage_l2_n: Option<f64>,
    #[serde(rename = "Generator_Voltage_L3_N")]
    pub generator_voltage_l3_n: Option<f64>,
    #[serde(rename = "Generator_Voltage_L1_L2")]
    pub generator_voltage_l1_l2: Option<f64>,
    #[serde(rename = "Generator_Voltage_L2_L3")]
    pub generator_voltage_l2_l3: Option<f64>,
    #[serde(rename = "Generator_Voltage_L3_L1")]
    pub generator_voltage_l3_l1: Option<f64>,

    #[serde(rename = "Generator_Current_L1")]
    pub generator_current_l1: Option<f64>,
    #[serde(rename = "Generator_Current_L2")]
    pub generator_current_l2: Option<f64>,
    #[serde(rename = "Generator_Current_L3")]
    pub generator_current_l3: Option<f64>,
    #[serde(rename = "Earth_Fault_Current")]
    pub earth_fault_current: Option<f64>,

    #[serde(rename = "Mains_Bus_Frequency")]
    pub mains_bus_frequency: Option<f64>,
    #[serde(rename = "Mains_Bus_Voltage_L1_N")]
    pub mains_bus_voltage_l1_n: Option<f64>,
    #[serde(rename = "Mains_Bus_Voltage_L2_N")]
    pub mains_bus_voltage_l2_n: Option<f64>,
    #[serde(rename = "Mains_Bus_Voltage_L3_N")]
    pub mains_bus_voltage_l3_n: Option<f64>,
    #[serde(rename = "Mains_Bus_Voltage_L1_L2")]
    pub mains_bus_voltage_l1_l2: Option<f64>,
    #[serde(rename = "Mains_Bus_Voltage_L2_L3")]
    pub mains_bus_voltage_l2_l3: Option<f64>,
    #[serde(rename = "Mains_Bus_Voltage_L3_L1")]
    pub mains_bus_voltage_l3_l1: Option<f64>,
    #[serde(rename = "Mains_PF")]
    pub mains_pf: Option<f64>,

    #[serde(rename = "ROCOF")]
    pub rocof: Option<f64>,
    #[serde(rename = "Max_ROCOF")]
    pub max_rocof: Option<f64>,

    #[serde(rename = "Load_P")]
    pub load_p: Option<f64>,
    #[serde(rename = "Load_Q")]
    pub load_q: Option<f64>,
    #[serde(rename = "Load_PF")]
    pub load_pf: Option<f64>,

    #[serde(rename = "Battery_Volts")]
    pub battery_volts: Option<f64>,
    #[serde(rename = "D_Plus")]
    pub d_plus: Option<f64>,
    #[serde(rename = "Oil_Pressure")]
    pub oil_pressure: Option<f64>,
    #[serde(rename = "Oil_Temperature")]
    pub oil_temperature: Option<f64>,
    #[serde(rename = "Fuel_Level")]
    pub fuel_level: Option<f64>,
    #[serde(rename = "E_STOP")]
    pub e_stop: Option<bool>,
}

/// Physical reading addressable on a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Rpm,
    GeneratorPL1,
    GeneratorPL2,
    GeneratorPL3,
    GeneratorQ,
    GeneratorPowerFactor,
    GeneratorFrequency,
    GeneratorVoltageL1N,
    GeneratorVoltageL2N,
    GeneratorVoltageL3N,
    GeneratorVoltageL1L2,
    GeneratorVoltageL2L3,
    GeneratorVoltageL3L1,
    GeneratorCurrentL1,
    GeneratorCurrentL2,
    GeneratorCurrentL3,
    EarthFaultCurrent,
    MainsBusFrequency,
    MainsBusVoltageL1N,
    MainsBusVoltageL2N,
    MainsBusVoltageL3N,
    MainsBusVoltageL1L2,
    MainsBusVoltageL2L3,
    MainsBusVoltageL3L1,
    MainsPf,
    Rocof,
    MaxRocof,
    LoadP,
    LoadQ,
    LoadPf,
    BatteryVolts,
    DPlus,
    OilPressure,
    OilTemperature,
    FuelLevel,
    EStop,
}

impl TelemetrySnapshot {
    /// Numeric view of a reading. Flags read as 1.0 (set) / 0.0 (clear).
    pub fn value(&self, field: Field) -> Option<f64> {
        match field {
            Field::Rpm => self.rpm,
            Field::GeneratorPL1 => self.generator_p_l1,
            Field::GeneratorPL2 => self.generator_p_l2,
            Field::GeneratorPL3 => self.generator_p_l3,
            Field::GeneratorQ => self.generator_q,
            Field::GeneratorPowerFactor => self.generator_power_factor,
            Field::GeneratorFrequency => self.generator_frequency,
            Field::GeneratorVoltageL1N => self.generator_voltage_l1_n,
            Field::GeneratorVoltageL2N => self.generator_voltage_l2_n,
            Field::GeneratorVoltageL3N => self.generator_voltage_l3_n,
            Field::GeneratorVoltageL1L2 => self.generator_voltage_l1_l2,
            Field::GeneratorVoltageL2L3 => self.generator_voltage_l2_l3,
            Field::GeneratorVoltageL3L1 => self.generator_voltage_l3_l1,
            Field::GeneratorCurrentL1 => self.generator_current_l1,
            Field::GeneratorCurrentL2 => self.generator_current_l2,
            Field::GeneratorCurrentL3 => self.generator_current_l3,
            Field::EarthFaultCurrent => self.earth_fault_current,
            Field::MainsBusFrequency => self.mains_bus_frequency,
            Field::MainsBusVoltageL1N => self.mains_bus_voltage_l1_n,
            Field::MainsBusVoltageL2N => self.mains_bus_voltage_l2_n,
            Field::MainsBusVoltageL3N => self.mains_bus_voltage_l3_n,
            Field::MainsBusVoltageL1L2 => self.mains_bus_voltage_l1_l2,
            Field::MainsBusVoltageL2L3 => self.mains_bus_voltage_l2_l3,
            Field::MainsBusVoltageL3L1 => self.mains_bus_voltage_l3_l1,
            Field::MainsPf => self.mains_pf,
            Field::Rocof => self.rocof,
            Field::MaxRocof => self.max_rocof,
            Field::LoadP => self.load_p,
            Field::LoadQ => self.load_q,
            Field::LoadPf => self.load_pf,
            Field::BatteryVolts => self.battery_volts,
            Field::DPlus => self.d_plus,
            Field::OilPressure => self.oil_pressure,
            Field::OilTemperature => self.oil_temperature,
            Field::FuelLevel => self.fuel_level,
            Field::EStop => self.e_stop.map(|set| if set { 1.0 } else { 0.0 }),
        }
    }

    /// Sum of the positive generator phase powers, or `None` when no phase reports load.
    pub fn generator_load_kw(&self) -> Option<f64> {
        let phases: Vec<f64> = [self.generator_p_l1, self.generator_p_l2, self.generator_p_l3]
            .into_iter()
            .flatten()
            .filter(|value| value.is_finite() && *value > 0.0)
            .collect();
        if phases.is_empty() {
            return None;
        }
        Some(phases.iter().sum())
    }
}
