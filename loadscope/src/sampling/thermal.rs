//! Temperature sensors from sysfs
//!
//! Both thermal zones (`class/thermal/thermal_zone*/temp`) and hwmon inputs
//! (`class/hwmon/hwmon*/temp*_input`) report millidegrees Celsius. The
//! hottest plausible reading is the one reported.

use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::SensorError;

/// Readings at or beyond these bounds are treated as sensor garbage
const MIN_PLAUSIBLE_C: f64 = -40.0;
const MAX_PLAUSIBLE_C: f64 = 150.0;

#[derive(Debug, Clone, Default)]
pub struct ThermalSensors {
    paths: Vec<PathBuf>,
}

impl ThermalSensors {
    /// Find every temperature input below `sys_root` (normally `/sys`)
    #[must_use]
    pub fn discover(sys_root: &Path) -> Self {
        let mut paths = Vec::new();

        for zone in subdirs_with_prefix(&sys_root.join("class/thermal"), "thermal_zone") {
            let temp = zone.join("temp");
            if temp.is_file() {
                paths.push(temp);
            }
        }

        for hwmon in subdirs_with_prefix(&sys_root.join("class/hwmon"), "hwmon") {
            let Ok(entries) = fs::read_dir(&hwmon) else { continue };
            let mut inputs: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("temp") && n.ends_with("_input"))
                })
                .collect();
            inputs.sort();
            paths.extend(inputs);
        }

        debug!("Found {} temperature inputs", paths.len());
        Self { paths }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Hottest plausible reading in °C
    ///
    /// `Ok(None)` when there are no sensors or none reported a plausible
    /// value. A single unreadable sensor is skipped.
    ///
    /// # Errors
    /// Returns the last read error if every sensor failed to read
    pub fn read_max(&self) -> Result<Option<f64>, SensorError> {
        let mut hottest: Option<f64> = None;
        let mut last_error = None;
        let mut read_any = false;

        for path in &self.paths {
            match fs::read_to_string(path) {
                Ok(content) => {
                    read_any = true;
                    if let Some(celsius) = parse_millidegrees(&content) {
                        hottest = Some(hottest.map_or(celsius, |h| h.max(celsius)));
                    }
                }
                Err(source) => {
                    last_error =
                        Some(SensorError::Read { path: path.display().to_string(), source });
                }
            }
        }

        match last_error {
            Some(e) if !read_any => Err(e),
            _ => Ok(hottest),
        }
    }
}

/// Parse a millidegree sysfs value into a plausible °C reading
#[must_use]
pub fn parse_millidegrees(content: &str) -> Option<f64> {
    let milli: i64 = content.trim().parse().ok()?;
    #[allow(clippy::cast_precision_loss)]
    let celsius = milli as f64 / 1000.0;
    (celsius > MIN_PLAUSIBLE_C && celsius < MAX_PLAUSIBLE_C).then_some(celsius)
}

fn subdirs_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_str().is_some_and(|n| n.starts_with(prefix)))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_parse_millidegrees() {
        assert_eq!(parse_millidegrees("45000\n"), Some(45.0));
        assert_eq!(parse_millidegrees("-5500"), Some(-5.5));
        assert_eq!(parse_millidegrees("150000"), None);
        assert_eq!(parse_millidegrees("-40000"), None);
        assert_eq!(parse_millidegrees("n/a"), None);
    }

    #[test]
    fn test_max_over_zones_and_hwmon() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "class/thermal/thermal_zone0/temp", "41000\n");
        write(root.path(), "class/thermal/thermal_zone1/temp", "255000\n");
        write(root.path(), "class/hwmon/hwmon2/temp1_input", "57500\n");
        write(root.path(), "class/hwmon/hwmon2/temp1_label", "Package id 0\n");

        let sensors = ThermalSensors::discover(root.path());
        assert_eq!(sensors.len(), 3);
        assert_eq!(sensors.read_max().unwrap(), Some(57.5));
    }

    #[test]
    fn test_no_sensors_is_none() {
        let root = tempfile::tempdir().unwrap();
        let sensors = ThermalSensors::discover(root.path());
        assert!(sensors.is_empty());
        assert_eq!(sensors.read_max().unwrap(), None);
    }

    #[test]
    fn test_all_sensors_unreadable_is_error() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "class/thermal/thermal_zone0/temp", "41000\n");
        let sensors = ThermalSensors::discover(root.path());
        fs::remove_file(root.path().join("class/thermal/thermal_zone0/temp")).unwrap();
        assert!(matches!(sensors.read_max(), Err(SensorError::Read { .. })));
    }
}
