//! Run tuning parameters
//!
//! Everything here has a default that works on a typical desktop; the CLI
//! exposes each field as a flag.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::RunError;

/// Interval between profile controller ticks
pub const DEFAULT_CONTROL_TICK: Duration = Duration::from_millis(100);
/// Interval between metric samples
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);
/// Length of one worker busy/idle window
pub const DEFAULT_DUTY_WINDOW: Duration = Duration::from_millis(100);
/// How long workers get to exit on their own before being killed
pub const DEFAULT_WORKER_GRACE: Duration = Duration::from_secs(2);
/// Upper bound on a single sensor read
pub const DEFAULT_SENSOR_TIMEOUT: Duration = Duration::from_millis(200);
/// Consecutive failed ticks before a periodic task gives up
pub const DEFAULT_FAULT_THRESHOLD: u32 = 5;

/// Shortest interval any timer may be configured with
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub control_tick: Duration,
    pub sample_interval: Duration,
    pub duty_window: Duration,
    pub worker_grace: Duration,
    pub sensor_timeout: Duration,
    pub fault_threshold: u32,
    /// Pin worker `i` to the `i`-th online CPU
    pub pin_workers: bool,
    /// Binary re-executed as `<exe> worker ...` for every worker process
    pub worker_exe: PathBuf,
}

impl RunConfig {
    /// Defaults, with workers spawned from `worker_exe`
    #[must_use]
    pub fn new(worker_exe: PathBuf) -> Self {
        Self {
            control_tick: DEFAULT_CONTROL_TICK,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            duty_window: DEFAULT_DUTY_WINDOW,
            worker_grace: DEFAULT_WORKER_GRACE,
            sensor_timeout: DEFAULT_SENSOR_TIMEOUT,
            fault_threshold: DEFAULT_FAULT_THRESHOLD,
            pin_workers: true,
            worker_exe,
        }
    }

    /// # Errors
    /// Returns [`RunError::Config`] naming the first bad field
    pub fn validate(&self) -> Result<(), RunError> {
        for (name, value) in [
            ("control tick", self.control_tick),
            ("sample interval", self.sample_interval),
            ("duty window", self.duty_window),
            ("sensor timeout", self.sensor_timeout),
        ] {
            if value < MIN_INTERVAL {
                return Err(RunError::Config(format!(
                    "{name} must be at least {MIN_INTERVAL:?}, got {value:?}"
                )));
            }
        }
        if self.fault_threshold == 0 {
            return Err(RunError::Config("fault threshold must be at least 1".to_string()));
        }
        if self.sensor_timeout > self.sample_interval {
            return Err(RunError::Config(format!(
                "sensor timeout ({:?}) must not exceed the sample interval ({:?})",
                self.sensor_timeout, self.sample_interval
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::new(PathBuf::from("/bin/true"));
        assert!(config.validate().is_ok());
        assert_eq!(config.control_tick, Duration::from_millis(100));
        assert_eq!(config.fault_threshold, 5);
    }

    #[test]
    fn test_rejects_zero_tick() {
        let mut config = RunConfig::new(PathBuf::from("/bin/true"));
        config.control_tick = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("control tick"));
    }

    #[test]
    fn test_rejects_timeout_longer_than_interval() {
        let mut config = RunConfig::new(PathBuf::from("/bin/true"));
        config.sensor_timeout = Duration::from_secs(1);
        assert!(matches!(config.validate(), Err(RunError::Config(_))));
    }
}
