//! [`SensorWatchdog`] – consecutive read-failure monitor.
//!
//! The fusion loop reports the outcome of every sensor read.  A timeout, an
//! absent frame or a driver error counts as a failure; any delivered frame
//! clears the sensor's streak.  When a streak grows past the threshold the
//! watchdog *trips*: the caller must issue a safe STOP for that cycle, and
//! the streak starts again from zero.

use std::collections::HashMap;

use omnisense_types::SensorId;
use tracing::warn;

/// # Example
///
/// ```
/// use omnisense_kernel::watchdog::SensorWatchdog;
///
/// let mut wd = SensorWatchdog::new(2);
/// wd.register("body");
/// assert!(!wd.record_failure("body"));
/// assert!(!wd.record_failure("body"));
/// assert!(wd.record_failure("body")); // third in a row exceeds 2
/// assert_eq!(wd.failures("body"), 0);
/// ```
#[derive(Debug)]
pub struct SensorWatchdog {
    threshold: u32,
    /// Consecutive failures per sensor.
    streaks: HashMap<SensorId, u32>,
}

impl SensorWatchdog {
    /// A watchdog tripping once a streak exceeds `threshold` failures.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            streaks: HashMap::new(),
        }
    }

    /// Start monitoring `sensor`.  Re-registering resets its streak.
    pub fn register(&mut self, sensor: &str) {
        self.streaks.insert(sensor.to_string(), 0);
    }

    /// A frame arrived from `sensor`.
    pub fn record_success(&mut self, sensor: &str) {
        self.streaks.insert(sensor.to_string(), 0);
    }

    /// A read of `sensor` failed.  Returns `true` when the streak exceeded
    /// the threshold; the streak is reset in that case.
    pub fn record_failure(&mut self, sensor: &str) -> bool {
        let streak = self.streaks.entry(sensor.to_string()).or_default();
        *streak += 1;
        if *streak > self.threshold {
            warn!(
                sensor,
                failures = *streak,
                "sensor failure streak exceeded threshold"
            );
            *streak = 0;
            return true;
        }
        false
    }

    /// Current streak length of `sensor`.
    pub fn failures(&self, sensor: &str) -> u32 {
        self.streaks.get(sensor).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_sensor_has_no_streak() {
        let mut wd = SensorWatchdog::new(3);
        wd.register("floor");
        assert_eq!(wd.failures("floor"), 0);
    }

    #[test]
    fn success_clears_streak() {
        let mut wd = SensorWatchdog::new(3);
        wd.record_failure("floor");
        wd.record_failure("floor");
        assert_eq!(wd.failures("floor"), 2);
        wd.record_success("floor");
        assert_eq!(wd.failures("floor"), 0);
    }

    #[test]
    fn trips_once_past_threshold_then_resets() {
        let mut wd = SensorWatchdog::new(3);
        let trips: Vec<bool> = (0..8).map(|_| wd.record_failure("body")).collect();
        assert_eq!(
            trips,
            vec![false, false, false, true, false, false, false, true]
        );
    }

    #[test]
    fn streaks_are_per_sensor() {
        let mut wd = SensorWatchdog::new(1);
        assert!(!wd.record_failure("floor"));
        assert!(!wd.record_failure("body"));
        wd.record_success("body");
        assert!(wd.record_failure("floor"));
        assert!(!wd.record_failure("body"));
    }

    #[test]
    fn register_resets_a_running_streak() {
        let mut wd = SensorWatchdog::new(5);
        wd.record_failure("body");
        wd.record_failure("body");
        wd.register("body");
        assert_eq!(wd.failures("body"), 0);
    }

    #[test]
    fn unknown_sensor_has_no_streak() {
        let wd = SensorWatchdog::new(1);
        assert_eq!(wd.failures("ghost"), 0);
    }
}
