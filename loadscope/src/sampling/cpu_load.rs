//! Aggregate CPU utilization from /proc/stat

use std::fs;
use std::path::Path;

use crate::domain::SensorError;

pub const PROC_STAT_PATH: &str = "/proc/stat";

/// Cumulative jiffies from the aggregate `cpu` line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    /// user + nice + system + idle + iowait + irq + softirq + steal
    pub total: u64,
    /// idle + iowait
    pub idle: u64,
}

impl CpuTimes {
    /// Parse the first (`cpu `) line of /proc/stat
    ///
    /// # Errors
    /// Returns a description of what was wrong with the line
    pub fn parse(stat: &str) -> Result<Self, String> {
        let line = stat
            .lines()
            .find(|l| l.starts_with("cpu "))
            .ok_or_else(|| "no aggregate cpu line".to_string())?;

        let fields = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .map(str::parse::<u64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("bad counter in {line:?}: {e}"))?;
        if fields.len() < 4 {
            return Err(format!("too few counters in {line:?}"));
        }

        // guest/guest_nice (fields 9, 10) are already included in user/nice
        let total = fields.iter().sum();
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        Ok(Self { total, idle })
    }

    #[must_use]
    pub fn busy(&self) -> u64 {
        self.total.saturating_sub(self.idle)
    }
}

/// Read and parse the stat file at `path`
///
/// # Errors
/// Returns [`SensorError::Read`] or [`SensorError::Parse`]
pub fn read_cpu_times(path: &Path) -> Result<CpuTimes, SensorError> {
    let content = fs::read_to_string(path)
        .map_err(|source| SensorError::Read { path: path.display().to_string(), source })?;
    CpuTimes::parse(&content)
        .map_err(|detail| SensorError::Parse { path: path.display().to_string(), detail })
}

/// Utilization across all cores between two snapshots, in percent
///
/// `None` when no time passed between the snapshots (or the counters went
/// backwards).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn load_between(prev: &CpuTimes, now: &CpuTimes) -> Option<f64> {
    let total = now.total.checked_sub(prev.total)?;
    if total == 0 {
        return None;
    }
    let busy = now.busy().saturating_sub(prev.busy()).min(total);
    Some(busy as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "cpu  4705 356 584 3699 23 23 0 0 0 0\n\
                        cpu0 1393 280 290 3222 17 14 0 0 0 0\n\
                        intr 114930548 113199788 3 0 5 263 0 4 [... lots more numbers ...]\n";

    #[test]
    fn test_parse_aggregate_line() {
        let times = CpuTimes::parse(STAT).unwrap();
        assert_eq!(times.total, 4705 + 356 + 584 + 3699 + 23 + 23);
        assert_eq!(times.idle, 3699 + 23);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(CpuTimes::parse("intr 1 2 3\n").is_err());
        assert!(CpuTimes::parse("cpu  1 2 x 4\n").is_err());
        assert!(CpuTimes::parse("cpu  1 2\n").is_err());
    }

    #[test]
    fn test_load_between() {
        let prev = CpuTimes { total: 1_000, idle: 800 };
        let now = CpuTimes { total: 1_200, idle: 900 };
        let load = load_between(&prev, &now).unwrap();
        assert!((load - 50.0).abs() < 1e-9);

        assert_eq!(load_between(&now, &now), None);
        assert_eq!(load_between(&now, &prev), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_reads_real_proc_stat() {
        let times = read_cpu_times(Path::new(PROC_STAT_PATH)).unwrap();
        assert!(times.total > 0);
        assert!(times.idle <= times.total);
    }
}
