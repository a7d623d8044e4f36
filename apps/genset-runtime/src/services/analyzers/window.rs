use chrono::Duration as ChronoDuration;

use crate::telemetry::TelemetrySnapshot;

/// Acceptance rules for a first/last rate over one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePolicy {
    pub min_points: usize,
    pub min_change: f64,
    pub min_elapsed_hours: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateCalc {
    /// Level per hour, positive when depleting.
    Rate(f64),
    /// Change below the policy minimum.
    Stable,
    /// Refuel or charge between the first and last valid readings.
    LevelIncreased,
    InsufficientPoints,
    NoValidReadings,
    TooShort,
}

/// One step of the adaptive window chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStep {
    pub window: ChronoDuration,
    pub relaxed: bool,
}

pub fn adaptive_steps() -> [WindowStep; 4] {
    [
        WindowStep {
            window: ChronoDuration::hours(2),
            relaxed: false,
        },
        WindowStep {
            window: ChronoDuration::hours(1),
            relaxed: false,
        },
        WindowStep {
            window: ChronoDuration::minutes(30),
            relaxed: true,
        },
        WindowStep {
            window: ChronoDuration::minutes(15),
            relaxed: true,
        },
    ]
}

/// Rate from the chronologically first and last valid readings in `snapshots`.
/// Readings in between, refuels included, are ignored.
pub fn first_last_rate<F>(
    snapshots: &[TelemetrySnapshot],
    policy: &RatePolicy,
    read: F,
) -> RateCalc
where
    F: Fn(&TelemetrySnapshot) -> Option<f64>,
{
    if snapshots.len() < policy.min_points {
        return RateCalc::InsufficientPoints;
    }

    let mut ordered: Vec<&TelemetrySnapshot> = snapshots.iter().collect();
    ordered.sort_by_key(|snapshot| snapshot.timestamp);

    let mut valid = ordered
        .iter()
        .filter_map(|snapshot| read(*snapshot).map(|value| (snapshot.timestamp, value)));
    let Some(first) = valid.next() else {
        return RateCalc::NoValidReadings;
    };
    let Some(last) = valid.last() else {
        return RateCalc::NoValidReadings;
    };

    let delta = first.1 - last.1;
    if delta.abs() < policy.min_change {
        return RateCalc::Stable;
    }
    if delta < 0.0 {
        return RateCalc::LevelIncreased;
    }

    let elapsed_hours = (last.0 - first.0).num_milliseconds() as f64 / 3_600_000.0;
    if elapsed_hours < policy.min_elapsed_hours {
        return RateCalc::TooShort;
    }

    RateCalc::Rate(delta / elapsed_hours)
}

/// Mean of a per-snapshot value over the snapshots that have one.
pub fn mean_of<F>(snapshots: &[TelemetrySnapshot], read: F) -> Option<f64>
where
    F: Fn(&TelemetrySnapshot) -> Option<f64>,
{
    let values: Vec<f64> = snapshots.iter().filter_map(read).collect();
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn max_of<F>(snapshots: &[TelemetrySnapshot], read: F) -> Option<f64>
where
    F: Fn(&TelemetrySnapshot) -> Option<f64>,
{
    snapshots.iter().filter_map(read).reduce(f64::max)
}

/// Most recent valid reading.
pub fn latest_valid<F>(snapshots: &[TelemetrySnapshot], read: F) -> Option<f64>
where
    F: Fn(&TelemetrySnapshot) -> Option<f64>,
{
    snapshots
        .iter()
        .filter_map(|snapshot| read(snapshot).map(|value| (snapshot.timestamp, value)))
        .max_by_key(|(timestamp, _)| *timestamp)
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fuel_series;

    const STRICT: RatePolicy = RatePolicy {
        min_points: 3,
        min_change: 0.2,
        min_elapsed_hours: 0.1,
    };

    fn fuel(snapshot: &TelemetrySnapshot) -> Option<f64> {
        snapshot.fuel_level
    }

    #[test]
    fn uses_first_and_last_valid_reading_across_a_refuel() {
        let snapshots = fuel_series(&[(0, 80.0), (60, 90.0), (120, 56.0)]);
        assert_eq!(first_last_rate(&snapshots, &STRICT, fuel), RateCalc::Rate(12.0));
    }

    #[test]
    fn order_of_input_does_not_matter() {
        let mut snapshots = fuel_series(&[(0, 80.0), (60, 70.0), (120, 60.0)]);
        snapshots.reverse();
        assert_eq!(first_last_rate(&snapshots, &STRICT, fuel), RateCalc::Rate(10.0));
    }

    #[test]
    fn level_increase_never_yields_a_negative_rate() {
        let snapshots = fuel_series(&[(0, 40.0), (30, 45.0), (60, 70.0)]);
        assert_eq!(
            first_last_rate(&snapshots, &STRICT, fuel),
            RateCalc::LevelIncreased
        );
    }

    #[test]
    fn small_change_is_stable_before_direction_is_checked() {
        let snapshots = fuel_series(&[(0, 50.0), (30, 50.1), (60, 50.1)]);
        assert_eq!(first_last_rate(&snapshots, &STRICT, fuel), RateCalc::Stable);
    }

    #[test]
    fn rejects_sparse_or_short_windows() {
        let sparse = fuel_series(&[(0, 50.0), (60, 40.0)]);
        assert_eq!(
            first_last_rate(&sparse, &STRICT, fuel),
            RateCalc::InsufficientPoints
        );

        let short = fuel_series(&[(0, 50.0), (2, 49.0), (4, 48.0)]);
        assert_eq!(first_last_rate(&short, &STRICT, fuel), RateCalc::TooShort);
    }

    #[test]
    fn single_valid_reading_is_not_a_rate() {
        let mut snapshots = fuel_series(&[(0, 50.0), (30, 45.0), (60, 40.0)]);
        snapshots[1].fuel_level = None;
        snapshots[2].fuel_level = None;
        assert_eq!(
            first_last_rate(&snapshots, &STRICT, fuel),
            RateCalc::NoValidReadings
        );
    }

    #[test]
    fn latest_valid_skips_missing_readings() {
        let mut snapshots = fuel_series(&[(0, 50.0), (5, 49.0), (10, 48.0)]);
        snapshots[2].fuel_level = None;
        assert_eq!(latest_valid(&snapshots, fuel), Some(49.0));
        assert_eq!(mean_of(&snapshots, fuel), Some(49.5));
    }
}
