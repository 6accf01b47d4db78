//! Load profiles
//!
//! A profile maps time since the run started to a target load percentage.
//! Profiles are immutable once a run starts; the controller evaluates
//! [`LoadProfile::target_at`] on every control tick.
//!
//! ```text
//! Constant   ───────────────────────────  p
//!
//! Pulsed      ┌────┐    ┌────┐    ┌────   hi
//!             │    │    │    │    │
//!          ───┘    └────┘    └────┘       lo
//!             |<-period->|
//!
//! Ramp                  ________________  e
//!                  ____/
//!             ____/
//!          s /
//!            |<-duration->|
//! ```

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::domain::types::duration_secs;
use crate::domain::{Percent, ProfileError};

/// Target load over time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadProfile {
    /// Same target for the whole run
    Constant { percent: f64 },

    /// Square wave: `high_percent` for the first half of every period,
    /// `low_percent` for the second half
    Pulsed {
        high_percent: f64,
        low_percent: f64,
        #[serde(serialize_with = "duration_secs::serialize")]
        period: Duration,
    },

    /// Linear interpolation from `start_percent` to `end_percent` over
    /// `duration`, then holds at `end_percent`
    Ramp {
        start_percent: f64,
        end_percent: f64,
        #[serde(serialize_with = "duration_secs::serialize")]
        duration: Duration,
    },
}

impl LoadProfile {
    /// Short lowercase name of the profile kind
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            LoadProfile::Constant { .. } => "constant",
            LoadProfile::Pulsed { .. } => "pulsed",
            LoadProfile::Ramp { .. } => "ramp",
        }
    }

    /// Check every parameter
    ///
    /// # Errors
    /// Returns the first invalid parameter found
    pub fn validate(&self) -> Result<(), ProfileError> {
        match *self {
            LoadProfile::Constant { percent } => check_percent("load", percent),
            LoadProfile::Pulsed { high_percent, low_percent, period } => {
                check_percent("high load", high_percent)?;
                check_percent("low load", low_percent)?;
                if period.is_zero() {
                    return Err(ProfileError::ZeroPulsePeriod);
                }
                Ok(())
            }
            LoadProfile::Ramp { start_percent, end_percent, duration } => {
                check_percent("start load", start_percent)?;
                check_percent("end load", end_percent)?;
                if duration.is_zero() {
                    return Err(ProfileError::ZeroRampDuration);
                }
                Ok(())
            }
        }
    }

    /// Target load at `elapsed` since the run started
    ///
    /// Always clamped into [0, 100], even for a profile that skipped
    /// validation.
    #[must_use]
    pub fn target_at(&self, elapsed: Duration) -> Percent {
        match *self {
            LoadProfile::Constant { percent } => Percent::clamped(percent),
            LoadProfile::Pulsed { high_percent, low_percent, period } => {
                let period_ns = period.as_nanos();
                if period_ns == 0 {
                    return Percent::clamped(high_percent);
                }
                // Integer nanoseconds keep the half-period edge exact; at the
                // edge itself the upcoming half wins.
                let position = elapsed.as_nanos() % period_ns;
                if position * 2 < period_ns {
                    Percent::clamped(high_percent)
                } else {
                    Percent::clamped(low_percent)
                }
            }
            LoadProfile::Ramp { start_percent, end_percent, duration } => {
                if elapsed >= duration {
                    return Percent::clamped(end_percent);
                }
                let progress = (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0);
                Percent::clamped(start_percent + (end_percent - start_percent) * progress)
            }
        }
    }
}

impl fmt::Display for LoadProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadProfile::Constant { percent } => write!(f, "constant {percent}%"),
            LoadProfile::Pulsed { high_percent, low_percent, period } => write!(
                f,
                "pulsed {high_percent}%/{low_percent}% every {:.1}s",
                period.as_secs_f64()
            ),
            LoadProfile::Ramp { start_percent, end_percent, duration } => write!(
                f,
                "ramp {start_percent}% -> {end_percent}% over {:.1}s",
                duration.as_secs_f64()
            ),
        }
    }
}

fn check_percent(field: &'static str, value: f64) -> Result<(), ProfileError> {
    if !value.is_finite() {
        return Err(ProfileError::NotFinite { field, value });
    }
    if !(0.0..=100.0).contains(&value) {
        return Err(ProfileError::PercentOutOfRange { field, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_constant_is_flat() {
        let profile = LoadProfile::Constant { percent: 50.0 };
        for t in (0..5_000).step_by(100) {
            assert_eq!(profile.target_at(ms(t)), Percent::clamped(50.0));
        }
    }

    #[test]
    fn test_ramp_midpoint_and_hold() {
        let profile =
            LoadProfile::Ramp { start_percent: 10.0, end_percent: 90.0, duration: ms(10_000) };
        assert!((profile.target_at(ms(5_000)).value() - 50.0).abs() < 1e-9);
        assert!((profile.target_at(Duration::ZERO).value() - 10.0).abs() < 1e-9);
        assert!((profile.target_at(ms(10_000)).value() - 90.0).abs() < 1e-9);
        assert!((profile.target_at(ms(60_000)).value() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_ramp_is_monotonic_in_both_directions() {
        let up = LoadProfile::Ramp { start_percent: 0.0, end_percent: 100.0, duration: ms(2_000) };
        let down =
            LoadProfile::Ramp { start_percent: 80.0, end_percent: 20.0, duration: ms(2_000) };
        let mut prev_up = up.target_at(Duration::ZERO);
        let mut prev_down = down.target_at(Duration::ZERO);
        for t in (0..=3_000).step_by(50) {
            let u = up.target_at(ms(t));
            let d = down.target_at(ms(t));
            assert!(u >= prev_up, "ramp up decreased at {t}ms");
            assert!(d <= prev_down, "ramp down increased at {t}ms");
            prev_up = u;
            prev_down = d;
        }
    }

    #[test]
    fn test_pulsed_only_takes_two_values_and_switches_twice_per_period() {
        let profile =
            LoadProfile::Pulsed { high_percent: 90.0, low_percent: 10.0, period: ms(1_000) };
        let hi = Percent::clamped(90.0);
        let lo = Percent::clamped(10.0);

        let mut transitions = 0;
        let mut prev = profile.target_at(Duration::ZERO);
        assert_eq!(prev, hi);
        // Three full periods sampled every 10ms
        for t in (10..3_000).step_by(10) {
            let target = profile.target_at(ms(t));
            assert!(target == hi || target == lo, "intermediate value at {t}ms");
            if target != prev {
                transitions += 1;
            }
            prev = target;
        }
        // hi->lo and lo->hi in each of three periods, minus the final lo->hi at 3000ms
        assert_eq!(transitions, 5);
    }

    #[test]
    fn test_pulsed_edges_resolve_to_upcoming_half() {
        let profile =
            LoadProfile::Pulsed { high_percent: 70.0, low_percent: 20.0, period: ms(400) };
        assert_eq!(profile.target_at(ms(199)), Percent::clamped(70.0));
        assert_eq!(profile.target_at(ms(200)), Percent::clamped(20.0));
        assert_eq!(profile.target_at(ms(399)), Percent::clamped(20.0));
        assert_eq!(profile.target_at(ms(400)), Percent::clamped(70.0));
    }

    #[test]
    fn test_validation_rejects_bad_parameters() {
        assert_eq!(
            LoadProfile::Constant { percent: -1.0 }.validate(),
            Err(ProfileError::PercentOutOfRange { field: "load", value: -1.0 })
        );
        assert!(LoadProfile::Constant { percent: f64::INFINITY }.validate().is_err());
        assert_eq!(
            LoadProfile::Ramp { start_percent: 0.0, end_percent: 50.0, duration: Duration::ZERO }
                .validate(),
            Err(ProfileError::ZeroRampDuration)
        );
        assert_eq!(
            LoadProfile::Pulsed { high_percent: 90.0, low_percent: 10.0, period: Duration::ZERO }
                .validate(),
            Err(ProfileError::ZeroPulsePeriod)
        );
        assert!(LoadProfile::Pulsed { high_percent: 101.0, low_percent: 0.0, period: ms(10) }
            .validate()
            .is_err());
        assert!(LoadProfile::Constant { percent: 100.0 }.validate().is_ok());
    }

    #[test]
    fn test_unvalidated_profile_is_still_clamped() {
        let profile = LoadProfile::Constant { percent: 180.0 };
        assert_eq!(profile.target_at(ms(5)), Percent::FULL);
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let profile = LoadProfile::Ramp { start_percent: 10.0, end_percent: 100.0, duration: ms(1_500) };
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["kind"], "ramp");
        assert_eq!(json["duration"], 1.5);
    }
}
