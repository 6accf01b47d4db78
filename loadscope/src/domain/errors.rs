//! Structured error types for loadscope
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::SlotIndex;
use shared_memory::ShmemError;
use std::time::Duration;
use thiserror::Error;

/// Rejected load profile parameters (reported before anything is spawned)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfileError {
    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },

    #[error("{field} must be between 0 and 100, got {value}")]
    PercentOutOfRange { field: &'static str, value: f64 },

    #[error("ramp duration must be greater than zero")]
    ZeroRampDuration,

    #[error("pulse period must be greater than zero")]
    ZeroPulsePeriod,

    #[error("{field} is required for the {profile} profile")]
    MissingParameter { field: &'static str, profile: &'static str },
}

#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("register needs between 1 and {max} slots, got {requested}")]
    InvalidSlotCount { requested: usize, max: usize },

    #[error("shared memory region {os_id} is {len} bytes, expected at least {needed}")]
    RegionTooSmall { os_id: String, len: usize, needed: usize },

    #[error("shared memory region {0} is not a loadscope control register")]
    BadMagic(String),

    #[error("control register layout version {found} is not supported (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("{slot} is out of range for a register with {slot_count} slots")]
    SlotOutOfRange { slot: SlotIndex, slot_count: usize },

    #[error("shared memory error: {0}")]
    Shmem(#[from] ShmemError),
}

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected contents in {path}: {detail}")]
    Parse { path: String, detail: String },

    #[error("{what} read timed out after {limit:?}")]
    Timeout { what: &'static str, limit: Duration },

    #[error("{what} read task failed: {detail}")]
    TaskFailed { what: &'static str, detail: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("no session is recording (markers can only be added during a run)")]
    NotRecording,
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("a run is already in progress")]
    AlreadyRunning,

    #[error("no run is in progress")]
    NotRunning,

    #[error("invalid load profile: {0}")]
    Profile(#[from] ProfileError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("control register: {0}")]
    Register(#[from] RegisterError),

    #[error("failed to spawn worker for {slot}: {source}")]
    WorkerSpawn {
        slot: SlotIndex,
        #[source]
        source: std::io::Error,
    },

    #[error("no online CPUs found to run workers on")]
    NoCpus,
}

/// A controller tick that could not publish a target
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("controller ticked while not running")]
    NotRunning,

    #[error("target sink has no worker slots")]
    NoSlots,
}

/// A periodic task gave up after too many consecutive failed ticks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{task} failed {consecutive} consecutive ticks (last error: {last_error})")]
pub struct RunFault {
    pub task: &'static str,
    pub consecutive: u32,
    pub last_error: String,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("line {line}: {detail}")]
    Parse { line: usize, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_error_display() {
        let err = ProfileError::PercentOutOfRange { field: "load", value: -5.0 };
        assert_eq!(err.to_string(), "load must be between 0 and 100, got -5");
    }

    #[test]
    fn test_worker_spawn_error() {
        let err = RunError::WorkerSpawn {
            slot: SlotIndex(2),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.to_string().contains("Slot#2"));
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn test_run_fault_display() {
        let fault = RunFault {
            task: "sampler",
            consecutive: 5,
            last_error: "Failed to read /proc/stat".to_string(),
        };
        assert_eq!(
            fault.to_string(),
            "sampler failed 5 consecutive ticks (last error: Failed to read /proc/stat)"
        );
    }

    #[test]
    fn test_profile_error_converts_into_run_error() {
        let err: RunError = ProfileError::ZeroRampDuration.into();
        assert!(err.to_string().starts_with("invalid load profile"));
    }
}
