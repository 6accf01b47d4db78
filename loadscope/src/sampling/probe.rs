//! Sensor access through procfs and sysfs

use std::path::{Path, PathBuf};

use super::cpu_load::{read_cpu_times, CpuTimes, PROC_STAT_PATH};
use super::energy::{EnergyReading, RaplCounter};
use super::thermal::ThermalSensors;
use super::MetricsProbe;
use crate::domain::SensorError;

/// The real sensors of this machine
#[derive(Debug, Clone)]
pub struct SysfsProbe {
    stat_path: PathBuf,
    thermal: ThermalSensors,
    rapl: Option<RaplCounter>,
}

impl SysfsProbe {
    /// Discover sensors under `/proc` and `/sys`
    #[must_use]
    pub fn discover() -> Self {
        Self::with_roots(Path::new(PROC_STAT_PATH), Path::new("/sys"))
    }

    /// Discover sensors using an alternative stat file and sysfs root
    #[must_use]
    pub fn with_roots(stat_path: &Path, sys_root: &Path) -> Self {
        Self {
            stat_path: stat_path.to_path_buf(),
            thermal: ThermalSensors::discover(sys_root),
            rapl: RaplCounter::discover(sys_root),
        }
    }

    #[must_use]
    pub fn thermal_inputs(&self) -> usize {
        self.thermal.len()
    }

    #[must_use]
    pub fn rapl(&self) -> Option<&RaplCounter> {
        self.rapl.as_ref()
    }
}

impl MetricsProbe for SysfsProbe {
    fn cpu_times(&self) -> Result<CpuTimes, SensorError> {
        read_cpu_times(&self.stat_path)
    }

    fn temperature(&self) -> Result<Option<f64>, SensorError> {
        self.thermal.read_max()
    }

    fn energy(&self) -> Result<Option<EnergyReading>, SensorError> {
        self.rapl.as_ref().map(RaplCounter::read).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_probe_over_fake_tree() {
        let root = tempfile::tempdir().unwrap();
        let stat = root.path().join("stat");
        fs::write(&stat, "cpu  10 0 10 80 0 0 0 0 0 0\n").unwrap();
        let zone = root.path().join("sys/class/thermal/thermal_zone0");
        fs::create_dir_all(&zone).unwrap();
        fs::write(zone.join("temp"), "48000\n").unwrap();

        let probe = SysfsProbe::with_roots(&stat, &root.path().join("sys"));
        assert_eq!(probe.cpu_times().unwrap(), CpuTimes { total: 100, idle: 80 });
        assert_eq!(probe.temperature().unwrap(), Some(48.0));
        assert_eq!(probe.energy().unwrap(), None);
        assert_eq!(probe.thermal_inputs(), 1);
        assert!(probe.rapl().is_none());
    }
}
