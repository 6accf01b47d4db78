//! # Load Workers
//!
//! One worker process runs per logical core. Each one attaches to the
//! control register, pins itself to its CPU and then loops over fixed-length
//! duty windows:
//!
//! ```text
//!  window n                     window n+1
//! ├──────── busy ────────┼─ idle ─┤──────── busy ───────┼── idle ──┤
//!  ^ re-read target                ^ re-read target
//!  ^ check stop flag               ^ check stop flag
//! ```
//!
//! A target change is therefore picked up within one window, and so is the
//! stop flag.
//!
//! - [`duty`]: window arithmetic and the data-dependent spin loop
//! - [`affinity`]: CPU pinning and parent-death signal
//! - [`pool`]: spawning and reaping the worker processes (controller side)

pub mod affinity;
pub mod duty;
pub mod pool;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

use crate::domain::{CpuId, SlotIndex};
use crate::register::ControlRegister;

pub use duty::{DutyPlan, SPIN_SEED};
pub use pool::{ShutdownReport, WorkerPool, WorkerSpawnSpec};

/// Everything a worker process needs, passed on its command line
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Shared memory name of the control register
    pub register: String,
    pub slot: SlotIndex,
    pub window: Duration,
    /// CPU to pin to; `None` leaves placement to the scheduler
    pub cpu: Option<CpuId>,
}

/// What a worker reports when it exits cleanly
#[derive(Debug, Clone, Copy)]
pub struct WorkerSummary {
    pub windows: u64,
    /// Final spin state, reported so the busy loop's result is observable
    pub checksum: u64,
}

/// Worker process entry point: run duty windows until the stop flag is raised
///
/// # Errors
/// Returns an error if the register cannot be attached or the slot does not
/// exist
pub fn run_worker(options: &WorkerOptions) -> Result<WorkerSummary> {
    if let Err(e) = affinity::die_with_parent() {
        warn!("{}: could not set parent-death signal: {e}", options.slot);
    }

    if let Some(cpu) = options.cpu {
        match affinity::pin_to_cpu(cpu) {
            Ok(()) => debug!("{} pinned to {cpu}", options.slot),
            Err(e) => warn!("{}: failed to pin to {cpu}: {e}", options.slot),
        }
    }

    let register = ControlRegister::open(&options.register)
        .with_context(|| format!("Failed to attach control register {}", options.register))?;
    let slot = register.worker_slot(options.slot)?;

    info!("{} started (window {:?})", options.slot, options.window);

    let mut state = SPIN_SEED;
    let mut windows = 0u64;

    while !slot.stop_requested() {
        let window_start = Instant::now();
        let plan = DutyPlan::for_target(options.window, slot.target());

        if !plan.busy.is_zero() {
            state = duty::spin_until(window_start, plan.busy, state);
        }

        // Sleep to the window deadline rather than for `plan.idle`, so that
        // overshoot in the busy phase does not accumulate.
        let remaining = options.window.saturating_sub(window_start.elapsed());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }

        slot.complete_window();
        windows += 1;
    }

    info!("{} stopping after {windows} windows", options.slot);
    Ok(WorkerSummary { windows, checksum: state })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Percent;
    use crate::register::TargetSink;

    #[test]
    fn test_worker_runs_until_stop_flag() {
        let id = format!("loadscope_test_{}_worker_loop", std::process::id());
        let register = ControlRegister::create(&id, 1).unwrap();
        register.publish_all(Percent::clamped(30.0));

        let options = WorkerOptions {
            register: id.clone(),
            slot: SlotIndex(0),
            window: Duration::from_millis(10),
            cpu: None,
        };
        let handle = std::thread::spawn(move || run_worker(&options));

        std::thread::sleep(Duration::from_millis(100));
        register.quiesce();

        let summary = handle.join().unwrap().unwrap();
        assert!(summary.windows >= 3, "only {} windows ran", summary.windows);
        assert_eq!(register.windows_completed(SlotIndex(0)).unwrap(), summary.windows);
        assert_ne!(summary.checksum, SPIN_SEED);
    }

    #[test]
    fn test_worker_fails_without_register() {
        let options = WorkerOptions {
            register: format!("loadscope_test_{}_absent", std::process::id()),
            slot: SlotIndex(0),
            window: Duration::from_millis(10),
            cpu: None,
        };
        assert!(run_worker(&options).is_err());
    }
}
