//! Status output for the headless shell

use crate::engine::StopReport;
use crate::session::{Marker, Sample};

fn reading(value: Option<f64>, unit: &str) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v:.1}{unit}"))
}

/// One status line per sample
#[must_use]
pub fn format_sample(sample: &Sample, target: Option<f64>) -> String {
    let target = target.map(|t| format!(" (target {t:.0}%)")).unwrap_or_default();
    format!(
        "[{:>7.1}s] load {:>5.1}%{target}  temp {}  power {}",
        sample.elapsed.as_secs_f64(),
        sample.load_percent,
        reading(sample.temperature_celsius, "C"),
        reading(sample.power_watts, "W"),
    )
}

#[must_use]
pub fn format_marker(marker: &Marker) -> String {
    format!("[{:>7.1}s] marker: {}", marker.elapsed.as_secs_f64(), marker.note)
}

/// Print what happened during shutdown
pub fn display_stop_report(reason: &str, report: &StopReport) {
    eprintln!(
        "\n{reason}: {:.1}s, {} samples, {} markers, {} controller writes",
        report.elapsed.as_secs_f64(),
        report.samples,
        report.markers,
        report.controller_writes,
    );
    let workers = &report.workers;
    eprintln!(
        "workers: {} exited, {} failed, {} killed",
        workers.exited, workers.failed, workers.forced
    );
    if !report.controller_clean {
        eprintln!("warning: controller did not stop cleanly, targets were zeroed directly");
    }
    if let Some(fault) = &report.fault {
        eprintln!("fault: {fault}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_missing_sensors_show_na() {
        let sample = Sample {
            elapsed: Duration::from_millis(1_500),
            load_percent: 49.96,
            temperature_celsius: None,
            power_watts: Some(31.24),
        };
        let line = format_sample(&sample, Some(50.0));
        assert_eq!(line, "[    1.5s] load  50.0% (target 50%)  temp N/A  power 31.2W");
    }

    #[test]
    fn test_marker_line() {
        let marker = Marker { elapsed: Duration::from_millis(2_250), note: "door open".into() };
        assert!(format_marker(&marker).ends_with("marker: door open"));
    }
}
