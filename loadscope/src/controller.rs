//! # Profile Controller
//!
//! Turns the active [`LoadProfile`] into register writes.
//!
//! ```text
//!   start()            stop()
//! Idle ────▶ Running ────────▶ Stopping ──(targets = 0, stop flags)──▶ Idle
//!              │ ▲
//!              └─┘ tick(): target_at(elapsed) → every slot
//! ```
//!
//! [`ProfileController`] is the synchronous state machine; it knows nothing
//! about timers. [`run_control_loop`] drives it from a tokio interval until
//! the run is shut down or too many ticks fail in a row.

use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::domain::{ControlError, Percent, RunError};
use crate::fault::{publish_fault, FaultSlot, FaultTracker};
use crate::profile::LoadProfile;
use crate::register::TargetSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug)]
enum State {
    Idle,
    Running { profile: LoadProfile, started: Instant, last_elapsed: Duration },
    Stopping,
}

/// Profile controller state machine
#[derive(Debug)]
pub struct ProfileController {
    state: State,
    writes: u64,
    last_target: Option<Percent>,
}

impl Default for ProfileController {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileController {
    #[must_use]
    pub fn new() -> Self {
        Self { state: State::Idle, writes: 0, last_target: None }
    }

    #[must_use]
    pub fn phase(&self) -> ControllerPhase {
        match self.state {
            State::Idle => ControllerPhase::Idle,
            State::Running { .. } => ControllerPhase::Running,
            State::Stopping => ControllerPhase::Stopping,
        }
    }

    /// Enter `Running` with `profile`, measuring elapsed time from `started`
    ///
    /// # Errors
    /// Returns [`RunError::AlreadyRunning`] unless idle, or
    /// [`RunError::Profile`] if the profile is invalid
    pub fn start(&mut self, profile: LoadProfile, started: Instant) -> Result<(), RunError> {
        if !matches!(self.state, State::Idle) {
            return Err(RunError::AlreadyRunning);
        }
        profile.validate()?;
        info!("Controller running {profile}");
        self.state = State::Running { profile, started, last_elapsed: Duration::ZERO };
        self.writes = 0;
        self.last_target = None;
        Ok(())
    }

    /// When the current run started
    #[must_use]
    pub fn started_at(&self) -> Option<Instant> {
        match self.state {
            State::Running { started, .. } => Some(started),
            _ => None,
        }
    }

    /// Compute the target for `now` and write it into every slot
    ///
    /// Writes happen on every tick, changed or not. If `now` lies before the
    /// previous tick the previous elapsed time is reused, so the profile
    /// never sees time run backwards.
    ///
    /// # Errors
    /// Returns a [`ControlError`] when nothing was written
    pub fn tick(&mut self, now: Instant, sink: &dyn TargetSink) -> Result<Percent, ControlError> {
        let State::Running { profile, started, last_elapsed } = &mut self.state else {
            return Err(ControlError::NotRunning);
        };
        if sink.slot_count() == 0 {
            return Err(ControlError::NoSlots);
        }

        let mut elapsed = now.saturating_duration_since(*started);
        if elapsed < *last_elapsed {
            debug!("Clock went backwards ({elapsed:?} < {last_elapsed:?}); holding");
            elapsed = *last_elapsed;
        }
        *last_elapsed = elapsed;

        let target = profile.target_at(elapsed);
        sink.publish_all(target);
        self.writes += 1;
        self.last_target = Some(target);
        Ok(target)
    }

    /// Zero every target, raise every stop flag and return to `Idle`
    ///
    /// Returns `false` if the controller was not running.
    pub fn stop(&mut self, sink: &dyn TargetSink) -> bool {
        if !matches!(self.state, State::Running { .. }) {
            return false;
        }
        self.state = State::Stopping;
        sink.quiesce();
        self.writes += 1;
        self.last_target = Some(Percent::ZERO);
        self.state = State::Idle;
        debug!("Controller stopped after {} writes", self.writes);
        true
    }

    /// Target writes so far, including the final zeroing write on stop
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes
    }

    #[must_use]
    pub fn last_target(&self) -> Option<Percent> {
        self.last_target
    }
}

/// How the control loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Shutdown,
    Faulted,
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerReport {
    pub exit: LoopExit,
    /// Register writes, including the final zeroing write
    pub writes: u64,
    pub failed_ticks: u64,
}

/// Tick `controller` every `tick` until `shutdown` flips or faults repeat
///
/// The controller must already be running; ticks are aligned to its start
/// time. On the way out the register is always quiesced, whichever way the
/// loop ended.
pub async fn run_control_loop(
    mut controller: ProfileController,
    sink: Arc<dyn TargetSink>,
    tick: Duration,
    fault_threshold: u32,
    mut shutdown: watch::Receiver<bool>,
    faults: Arc<FaultSlot>,
) -> ControllerReport {
    let start = controller.started_at().unwrap_or_else(Instant::now);
    let mut ticker = interval_at(start, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tracker = FaultTracker::new("controller", fault_threshold);

    let exit = loop {
        if *shutdown.borrow_and_update() {
            break LoopExit::Shutdown;
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Owner went away without an explicit stop
                    break LoopExit::Shutdown;
                }
            }
            now = ticker.tick() => {
                match controller.tick(now, sink.as_ref()) {
                    Ok(_) => tracker.record_ok(),
                    Err(e) => {
                        if let Some(fault) = tracker.record_fault(&e) {
                            error!("{fault}; driving all targets to 0");
                            publish_fault(&faults, fault);
                            break LoopExit::Faulted;
                        }
                    }
                }
            }
        }
    };

    if !controller.stop(sink.as_ref()) {
        sink.quiesce();
    }

    ControllerReport { exit, writes: controller.writes(), failed_ticks: tracker.total() }
}
