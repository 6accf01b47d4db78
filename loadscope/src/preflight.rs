//! Pre-flight checks for loadscope
//!
//! Validates the environment before any worker is spawned. Hard
//! requirements fail with an actionable message; missing sensors only warn,
//! since the run degrades to blank columns without them.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::sampling::cpu_load::{read_cpu_times, PROC_STAT_PATH};
use crate::sampling::SysfsProbe;

/// Where POSIX shared memory objects live on Linux
const SHM_DIR: &str = "/dev/shm";

/// Run all pre-flight checks before starting the engine
///
/// # Errors
/// Returns an error if a hard requirement is not met
pub fn run_preflight_checks(worker_exe: &Path, quiet: bool) -> Result<()> {
    check_worker_binary(worker_exe)?;
    check_shared_memory(Path::new(SHM_DIR))?;
    check_load_counters()?;
    if !quiet {
        for warning in sensor_warnings(&SysfsProbe::discover(), is_root()) {
            eprintln!("warning: {warning}");
        }
    }
    Ok(())
}

/// Check that the binary re-executed for workers exists
fn check_worker_binary(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!(
            "Worker binary not found: {}\n\n\
             loadscope re-executes itself for every worker process.\n\
             Was the binary moved or deleted while starting?",
            path.display()
        );
    }
    if !path.is_file() {
        bail!("Not a file: {}\n\nThe worker binary must be an executable file.", path.display());
    }
    Ok(())
}

/// Check that shared memory for the control register is available
fn check_shared_memory(dir: &Path) -> Result<()> {
    if cfg!(target_os = "linux") && !dir.is_dir() {
        bail!(
            "{} is not available\n\n\
             The control register shared with workers needs POSIX shared memory.\n\
             Mount it with: mount -t tmpfs tmpfs {}",
            dir.display(),
            dir.display()
        );
    }
    Ok(())
}

/// Check that CPU load can be measured at all
fn check_load_counters() -> Result<()> {
    read_cpu_times(Path::new(PROC_STAT_PATH)).with_context(|| {
        format!(
            "Cannot read CPU counters from {PROC_STAT_PATH}\n\n\
             This usually means /proc is not mounted."
        )
    })?;
    Ok(())
}

/// Warnings for sensors that will show up as N/A
fn sensor_warnings(probe: &SysfsProbe, root: bool) -> Vec<String> {
    let mut warnings = Vec::new();

    if probe.thermal_inputs() == 0 {
        warnings.push("no temperature sensors found, temperature will be N/A".to_string());
    }

    match probe.rapl() {
        None => warnings.push("no RAPL energy counter found, power will be N/A".to_string()),
        Some(rapl) => {
            if let Err(e) = rapl.read() {
                let hint = if root { "" } else { " (try running as root)" };
                warnings.push(format!("{e}, power will be N/A{hint}"));
            }
        }
    }

    warnings
}

fn is_root() -> bool {
    // SAFETY: geteuid() has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_binary_not_found() {
        let result = check_worker_binary(Path::new("/nonexistent/path/to/loadscope"));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Worker binary not found"));
    }

    #[test]
    fn test_worker_binary_is_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_worker_binary(dir.path()).unwrap_err().to_string();
        assert!(err.contains("Not a file"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_missing_shm_dir() {
        let err = check_shared_memory(Path::new("/nonexistent/shm")).unwrap_err().to_string();
        assert!(err.contains("POSIX shared memory"));
    }

    #[test]
    fn test_sensor_warnings_for_bare_machine() {
        let root = tempfile::tempdir().unwrap();
        let stat = root.path().join("stat");
        std::fs::write(&stat, "cpu  1 0 1 8 0 0 0 0 0 0\n").unwrap();
        let probe = SysfsProbe::with_roots(&stat, root.path());

        let warnings = sensor_warnings(&probe, false);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("temperature"));
        assert!(warnings[1].contains("power"));
    }

    #[test]
    fn test_unreadable_rapl_suggests_root() {
        let root = tempfile::tempdir().unwrap();
        let domain = root.path().join("class/powercap/intel-rapl:0");
        std::fs::create_dir_all(&domain).unwrap();
        std::fs::write(domain.join("name"), "package-0\n").unwrap();
        std::fs::write(domain.join("energy_uj"), "not a number\n").unwrap();
        std::fs::write(domain.join("max_energy_range_uj"), "1000\n").unwrap();
        let probe = SysfsProbe::with_roots(&root.path().join("stat"), root.path());

        let warnings = sensor_warnings(&probe, false);
        assert!(warnings.iter().any(|w| w.contains("try running as root")));
    }
}
