//! Aggregate statistics over a recorded or re-parsed session

use std::fmt;
use std::time::Duration;

use crate::session::{Marker, Sample};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub samples: usize,
    pub markers: usize,
    /// Elapsed time of the last sample
    pub duration: Duration,
    pub mean_load: Option<f64>,
    pub max_load: Option<f64>,
    pub max_temperature: Option<f64>,
    /// Mean over the samples that had a power reading
    pub mean_power: Option<f64>,
}

impl SessionSummary {
    #[must_use]
    pub fn from_parts(samples: &[Sample], markers: &[Marker]) -> Self {
        let loads: Vec<f64> = samples.iter().map(|s| s.load_percent).collect();
        let powers: Vec<f64> = samples.iter().filter_map(|s| s.power_watts).collect();

        Self {
            samples: samples.len(),
            markers: markers.len(),
            duration: samples.last().map_or(Duration::ZERO, |s| s.elapsed),
            mean_load: mean(&loads),
            max_load: max(loads.iter().copied()),
            max_temperature: max(samples.iter().filter_map(|s| s.temperature_celsius)),
            mean_power: mean(&powers),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn max(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.reduce(f64::max)
}

fn or_na(value: Option<f64>, unit: &str) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v:.1}{unit}"))
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "samples: {}", self.samples)?;
        writeln!(f, "markers: {}", self.markers)?;
        writeln!(f, "duration: {:.1}s", self.duration.as_secs_f64())?;
        writeln!(f, "mean load: {}", or_na(self.mean_load, "%"))?;
        writeln!(f, "max load: {}", or_na(self.max_load, "%"))?;
        writeln!(f, "max temperature: {}", or_na(self.max_temperature, "C"))?;
        write!(f, "mean power: {}", or_na(self.mean_power, "W"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ms: u64, load: f64, temp: Option<f64>, power: Option<f64>) -> Sample {
        Sample {
            elapsed: Duration::from_millis(ms),
            load_percent: load,
            temperature_celsius: temp,
            power_watts: power,
        }
    }

    #[test]
    fn test_summary_skips_missing_readings() {
        let samples = vec![
            sample(500, 40.0, Some(50.0), None),
            sample(1_000, 60.0, None, Some(20.0)),
            sample(1_500, 80.0, Some(65.5), Some(30.0)),
        ];
        let summary = SessionSummary::from_parts(&samples, &[]);
        assert_eq!(summary.samples, 3);
        assert_eq!(summary.duration, Duration::from_millis(1_500));
        assert_eq!(summary.mean_load, Some(60.0));
        assert_eq!(summary.max_load, Some(80.0));
        assert_eq!(summary.max_temperature, Some(65.5));
        assert_eq!(summary.mean_power, Some(25.0));
    }

    #[test]
    fn test_empty_summary_prints_na() {
        let summary = SessionSummary::from_parts(&[], &[]);
        let text = summary.to_string();
        assert!(text.contains("samples: 0"));
        assert!(text.contains("mean power: N/A"));
    }
}
