use crate::telemetry::TelemetrySnapshot;

use super::types::{
    validate_bounds, Alarm, MisconfiguredRule, Probe, Severity, Source, ThresholdReport,
    ThresholdRule,
};

/// Checks one snapshot against a device's rules. Pure: the same inputs always yield the
/// same report, and alarms carry the snapshot's timestamp.
pub fn evaluate(
    device_id: &str,
    rules: &[ThresholdRule],
    snapshot: &TelemetrySnapshot,
) -> ThresholdReport {
    let mut report = ThresholdReport::default();

    for rule in rules {
        if let Err(reason) = validate_bounds(rule.min_value, rule.max_value) {
            report.misconfigured.push(MisconfiguredRule {
                parameter: rule.parameter,
                min_value: rule.min_value,
                max_value: rule.max_value,
                reason,
            });
            continue;
        }

        for probe in rule.parameter.probes() {
            let Some(value) = read_probe(snapshot, probe) else {
                continue;
            };
            if let Some(alarm) = check(device_id, rule, probe.label, value, snapshot) {
                report.alarms.push(alarm);
            }
        }
    }

    report
}

fn read_probe(snapshot: &TelemetrySnapshot, probe: &Probe) -> Option<f64> {
    match probe.source {
        Source::Reading(field) => snapshot.value(field).filter(|v| v.is_finite()),
        Source::Mean(fields) => {
            let values: Vec<f64> = fields
                .iter()
                .filter_map(|field| snapshot.value(*field))
                .filter(|v| v.is_finite())
                .collect();
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
    }
}

fn check(
    device_id: &str,
    rule: &ThresholdRule,
    label: &str,
    value: f64,
    snapshot: &TelemetrySnapshot,
) -> Option<Alarm> {
    let (severity, direction, bound) = if value < rule.min_value {
        (Severity::Warning, "below minimum", rule.min_value)
    } else if value > rule.max_value {
        (Severity::Critical, "above maximum", rule.max_value)
    } else {
        return None;
    };

    Some(Alarm {
        device_id: device_id.to_string(),
        parameter: rule.parameter,
        message: format_message(rule, label, direction, bound),
        severity,
        value,
        timestamp: snapshot.timestamp,
    })
}

fn format_message(rule: &ThresholdRule, label: &str, direction: &str, bound: f64) -> String {
    let mut subject = rule.parameter.display_name().to_string();
    if !label.is_empty() {
        subject.push(' ');
        subject.push_str(label);
    }
    let unit = if rule.unit.trim().is_empty() {
        rule.parameter.unit()
    } else {
        rule.unit.trim()
    };
    let limit = if unit.is_empty() {
        format!("{bound:.2}")
    } else {
        format!("{bound:.2} {unit}")
    };
    format!("{subject} is {direction} threshold ({limit})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::thresholds::types::ThresholdParameter;
    use chrono::TimeZone;

    fn snapshot() -> TelemetrySnapshot {
        TelemetrySnapshot {
            timestamp: chrono::Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn bounds_are_inclusive() {
        let rules = vec![ThresholdRule::new(ThresholdParameter::OilPressure, 2.0, 6.0)];
        for value in [2.0, 4.0, 6.0] {
            let snap = TelemetrySnapshot {
                oil_pressure: Some(value),
                ..snapshot()
            };
            assert!(evaluate("gen-1", &rules, &snap).alarms.is_empty(), "{value}");
        }
    }

    #[test]
    fn below_minimum_warns_and_above_maximum_is_critical() {
        let rules = vec![ThresholdRule::new(ThresholdParameter::OilPressure, 2.0, 6.0)];

        let low = TelemetrySnapshot {
            oil_pressure: Some(1.5),
            ..snapshot()
        };
        let report = evaluate("gen-1", &rules, &low);
        assert_eq!(report.alarms.len(), 1);
        assert_eq!(report.alarms[0].severity, Severity::Warning);
        assert_eq!(
            report.alarms[0].message,
            "Oil Pressure is below minimum threshold (2.00 Bar)"
        );

        let high = TelemetrySnapshot {
            oil_pressure: Some(6.5),
            ..snapshot()
        };
        let report = evaluate("gen-1", &rules, &high);
        assert_eq!(report.alarms[0].severity, Severity::Critical);
        assert_eq!(
            report.alarms[0].message,
            "Oil Pressure is above maximum threshold (6.00 Bar)"
        );
        assert_eq!(report.alarms[0].timestamp, high.timestamp);
    }

    #[test]
    fn multi_phase_parameters_check_each_reading_with_labels() {
        let rules = vec![ThresholdRule::new(
            ThresholdParameter::GeneratorVoltageLn,
            200.0,
            250.0,
        )];
        let snap = TelemetrySnapshot {
            generator_voltage_l1_n: Some(230.0),
            generator_voltage_l2_n: Some(190.0),
            generator_voltage_l3_n: Some(260.0),
            ..snapshot()
        };

        let report = evaluate("gen-1", &rules, &snap);
        let messages: Vec<&str> = report.alarms.iter().map(|a| a.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Generator Voltage L-N L2-N is below minimum threshold (200.00 V)",
                "Generator Voltage L-N L3-N is above maximum threshold (250.00 V)",
            ]
        );
    }

    #[test]
    fn real_power_uses_mean_of_available_phases() {
        let rules = vec![ThresholdRule::new(ThresholdParameter::RealPower, 0.0, 100.0)];
        let snap = TelemetrySnapshot {
            generator_p_l1: Some(90.0),
            generator_p_l2: Some(150.0),
            ..snapshot()
        };

        let report = evaluate("gen-1", &rules, &snap);
        assert_eq!(report.alarms.len(), 1);
        assert_eq!(report.alarms[0].value, 120.0);
        assert!(report.alarms[0].message.starts_with("Real Power (P) (Generator)"));
    }

    #[test]
    fn e_stop_activation_is_out_of_range_and_absence_is_skipped() {
        let rules = vec![ThresholdRule::with_defaults(ThresholdParameter::EStop)];

        let active = TelemetrySnapshot {
            e_stop: Some(true),
            ..snapshot()
        };
        let report = evaluate("gen-1", &rules, &active);
        assert_eq!(report.alarms.len(), 1);
        assert_eq!(report.alarms[0].value, 1.0);
        assert_eq!(
            report.alarms[0].message,
            "E-STOP is above maximum threshold (0.00)"
        );

        let clear = TelemetrySnapshot {
            e_stop: Some(false),
            ..snapshot()
        };
        assert!(evaluate("gen-1", &rules, &clear).alarms.is_empty());
        assert!(evaluate("gen-1", &rules, &snapshot()).alarms.is_empty());
    }

    #[test]
    fn inverted_rule_is_reported_and_never_alarms() {
        let rules = vec![
            ThresholdRule::new(ThresholdParameter::FuelLevel, 90.0, 10.0),
            ThresholdRule::new(ThresholdParameter::Rpm, 1400.0, 1600.0),
        ];
        let snap = TelemetrySnapshot {
            fuel_level: Some(50.0),
            rpm: Some(1700.0),
            ..snapshot()
        };

        let report = evaluate("gen-1", &rules, &snap);
        assert_eq!(report.misconfigured.len(), 1);
        assert_eq!(report.misconfigured[0].parameter, ThresholdParameter::FuelLevel);
        assert_eq!(report.alarms.len(), 1);
        assert_eq!(report.alarms[0].parameter, ThresholdParameter::Rpm);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let rules = crate::services::thresholds::types::default_rules();
        let snap = TelemetrySnapshot {
            rpm: Some(1200.0),
            battery_volts: Some(29.0),
            fuel_level: Some(5.0),
            e_stop: Some(true),
            ..snapshot()
        };
        let first = evaluate("gen-1", &rules, &snap);
        let second = evaluate("gen-1", &rules, &snap);
        assert_eq!(first, second);
        assert_eq!(first.alarms.len(), 4);
    }
}
