//! Which logical CPUs a run spreads its workers over

use anyhow::{Context, Result};
use log::warn;
use std::fs;

use crate::domain::CpuId;

const ONLINE_CPUS_PATH: &str = "/sys/devices/system/cpu/online";

/// Online logical CPUs, in the order the kernel lists them
///
/// # Errors
/// Returns an error if the online mask is unreadable or malformed
pub fn online_cpus() -> Result<Vec<CpuId>> {
    let content = fs::read_to_string(ONLINE_CPUS_PATH)
        .with_context(|| format!("Failed to read {ONLINE_CPUS_PATH}"))?;
    parse_cpu_list(&content)
}

/// Parse a kernel CPU list ("0-3,8-11", "5", "0,2,4")
///
/// # Errors
/// Returns an error if a range bound is not a number
pub fn parse_cpu_list(content: &str) -> Result<Vec<CpuId>> {
    let mut cpus = Vec::new();

    for range in content.trim().split(',').filter(|r| !r.is_empty()) {
        let (first, last) = range.split_once('-').unwrap_or((range, range));
        let first: u32 = first.trim().parse().with_context(|| format!("bad cpu list entry {range:?}"))?;
        let last: u32 = last.trim().parse().with_context(|| format!("bad cpu list entry {range:?}"))?;
        cpus.extend((first..=last).map(CpuId));
    }

    Ok(cpus)
}

/// CPUs to place one worker on each
///
/// Falls back to `0..available_parallelism` when /sys is unavailable. The
/// length of the returned list is the worker count for the run.
#[must_use]
pub fn worker_cpus() -> Vec<CpuId> {
    match online_cpus() {
        Ok(cpus) if !cpus.is_empty() => cpus,
        Ok(_) => fallback_cpus(),
        Err(e) => {
            warn!("{e:#}; falling back to available_parallelism");
            fallback_cpus()
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn fallback_cpus() -> Vec<CpuId> {
    let count = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    (0..count as u32).map(CpuId).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3\n").unwrap(), vec![CpuId(0), CpuId(1), CpuId(2), CpuId(3)]);
        assert_eq!(
            parse_cpu_list("0-1,8-9").unwrap(),
            vec![CpuId(0), CpuId(1), CpuId(8), CpuId(9)]
        );
        assert_eq!(parse_cpu_list("5").unwrap(), vec![CpuId(5)]);
        assert!(parse_cpu_list("a-b").is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_online_mask_is_sorted() {
        let cpus = online_cpus().expect("online mask readable");
        assert!(!cpus.is_empty());
        assert!(cpus.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_worker_cpus_never_empty() {
        assert!(!worker_cpus().is_empty());
    }
}
