//! Package power from the RAPL energy counter
//!
//! `energy_uj` is a microjoule accumulator that wraps back to zero after
//! `max_energy_range_uj`. Power is the energy delta between two readings
//! divided by the time between them.

use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::SensorError;

const PACKAGE_DOMAIN: &str = "package-0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyReading {
    pub energy_uj: u64,
    pub max_energy_range_uj: u64,
}

/// The `package-0` RAPL domain
#[derive(Debug, Clone)]
pub struct RaplCounter {
    energy_path: PathBuf,
    range_path: PathBuf,
}

impl RaplCounter {
    /// Locate the package-0 domain below `sys_root` (normally `/sys`)
    #[must_use]
    pub fn discover(sys_root: &Path) -> Option<Self> {
        let powercap = sys_root.join("class/powercap");
        let mut domains: Vec<PathBuf> = fs::read_dir(&powercap)
            .ok()?
            .filter_map(Result::ok)
            .filter(|e| {
                // Top-level domains only ("intel-rapl:0", not "intel-rapl:0:1")
                e.file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with("intel-rapl:") && n.matches(':').count() == 1)
            })
            .map(|e| e.path())
            .collect();
        domains.sort();

        let domain = domains
            .iter()
            .find(|d| {
                fs::read_to_string(d.join("name")).is_ok_and(|n| n.trim() == PACKAGE_DOMAIN)
            })
            .or_else(|| domains.first())?;

        let counter = Self {
            energy_path: domain.join("energy_uj"),
            range_path: domain.join("max_energy_range_uj"),
        };
        if !counter.energy_path.exists() {
            return None;
        }
        debug!("Using RAPL counter {}", counter.energy_path.display());
        Some(counter)
    }

    /// # Errors
    /// Returns an error if either file cannot be read or parsed (reading
    /// `energy_uj` usually requires root)
    pub fn read(&self) -> Result<EnergyReading, SensorError> {
        Ok(EnergyReading {
            energy_uj: read_u64(&self.energy_path)?,
            max_energy_range_uj: read_u64(&self.range_path)?,
        })
    }

    #[must_use]
    pub fn energy_path(&self) -> &Path {
        &self.energy_path
    }
}

fn read_u64(path: &Path) -> Result<u64, SensorError> {
    let content = fs::read_to_string(path)
        .map_err(|source| SensorError::Read { path: path.display().to_string(), source })?;
    content.trim().parse().map_err(|e| SensorError::Parse {
        path: path.display().to_string(),
        detail: format!("{e}"),
    })
}

/// Energy consumed between two counter values, correcting one wraparound
#[must_use]
pub fn energy_delta(prev: u64, now: u64, max_range: u64) -> u64 {
    if now >= prev {
        now - prev
    } else {
        max_range.saturating_sub(prev) + now
    }
}

/// Turns successive counter readings into watts
#[derive(Debug, Default)]
pub struct EnergyMeter {
    prev: Option<(u64, Duration)>,
}

impl EnergyMeter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a reading taken at `at`; returns power since the previous one
    ///
    /// The first reading only primes the meter.
    pub fn update(&mut self, reading: EnergyReading, at: Duration) -> Option<f64> {
        let prev = self.prev.replace((reading.energy_uj, at));
        let (prev_uj, prev_at) = prev?;
        let dt = at.checked_sub(prev_at)?;
        if dt.is_zero() {
            return None;
        }
        let delta = energy_delta(prev_uj, reading.energy_uj, reading.max_energy_range_uj);
        #[allow(clippy::cast_precision_loss)]
        let joules = delta as f64 / 1_000_000.0;
        Some(joules / dt.as_secs_f64())
    }
}
