use serde::{Deserialize, Serialize};

/// Readings above this are assumed to come from a 24V starter battery bank.
const AUTO_DETECT_24V_ABOVE_V: f64 = 20.0;

/// Optional calibration data entered when a device is registered. Every field may be
/// missing or nonsense; accessors only return values that are usable in arithmetic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    #[serde(default)]
    pub fuel_tank_capacity_liters: Option<f64>,
    #[serde(default)]
    pub battery_voltage_nominal: Option<f64>,
    #[serde(default)]
    pub generator_capacity_kw: Option<f64>,
    #[serde(default)]
    pub battery_capacity_ah: Option<f64>,
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

impl DeviceSpec {
    pub fn tank_capacity_liters(&self) -> Option<f64> {
        positive(self.fuel_tank_capacity_liters)
    }

    pub fn generator_capacity_kw(&self) -> Option<f64> {
        positive(self.generator_capacity_kw)
    }

    pub fn battery_capacity_ah(&self) -> Option<f64> {
        positive(self.battery_capacity_ah)
    }

    pub fn nominal_voltage(&self) -> Option<f64> {
        positive(self.battery_voltage_nominal)
    }
}

/// Nominal voltage class of the starter battery, with its lead-acid calibration points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryClass {
    #[serde(rename = "12v")]
    V12,
    #[serde(rename = "24v")]
    V24,
}

impl BatteryClass {
    pub fn from_nominal(nominal_v: f64) -> Self {
        if nominal_v >= AUTO_DETECT_24V_ABOVE_V {
            Self::V24
        } else {
            Self::V12
        }
    }

    /// Configured class when known, otherwise guessed from the highest recent reading.
    pub fn resolve(spec: Option<&DeviceSpec>, peak_v: f64) -> Self {
        match spec.and_then(DeviceSpec::nominal_voltage) {
            Some(nominal) => Self::from_nominal(nominal),
            None if peak_v > AUTO_DETECT_24V_ABOVE_V => Self::V24,
            None => Self::V12,
        }
    }

    pub fn full_v(self) -> f64 {
        match self {
            Self::V12 => 12.7,
            Self::V24 => 25.4,
        }
    }

    pub fn half_v(self) -> f64 {
        match self {
            Self::V12 => 12.2,
            Self::V24 => 24.4,
        }
    }

    /// Depletion threshold; also the 0 % SOC point.
    pub fn empty_v(self) -> f64 {
        match self {
            Self::V12 => 10.5,
            Self::V24 => 21.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_drop_unusable_calibration() {
        let spec = DeviceSpec {
            fuel_tank_capacity_liters: Some(0.0),
            battery_voltage_nominal: Some(f64::NAN),
            generator_capacity_kw: Some(-5.0),
            battery_capacity_ah: Some(180.0),
        };
        assert_eq!(spec.tank_capacity_liters(), None);
        assert_eq!(spec.nominal_voltage(), None);
        assert_eq!(spec.generator_capacity_kw(), None);
        assert_eq!(spec.battery_capacity_ah(), Some(180.0));
    }

    #[test]
    fn battery_class_prefers_spec_over_reading() {
        let spec = DeviceSpec {
            battery_voltage_nominal: Some(12.0),
            ..Default::default()
        };
        assert_eq!(BatteryClass::resolve(Some(&spec), 24.8), BatteryClass::V12);
        assert_eq!(BatteryClass::resolve(None, 24.8), BatteryClass::V24);
        assert_eq!(BatteryClass::resolve(None, 12.4), BatteryClass::V12);
    }
}
