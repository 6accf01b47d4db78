//! Worker process pool (controller side)
//!
//! Spawns one `loadscope worker` process per CPU and reaps them on stop.
//! Every wait is bounded: a worker that ignores its stop flag past the grace
//! window is killed and counted as forced.

use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{timeout, timeout_at, Instant};

use crate::domain::{CpuId, Pid, RunError, SlotIndex};

/// How long to wait for a killed worker to be reaped
const KILL_REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// How to launch worker processes
#[derive(Debug, Clone)]
pub struct WorkerSpawnSpec {
    /// Executable that understands the hidden `worker` subcommand
    pub executable: PathBuf,
    /// Shared memory name of the control register
    pub register: String,
    pub window: Duration,
    pub pin: bool,
}

struct WorkerProcess {
    slot: SlotIndex,
    cpu: CpuId,
    child: Child,
}

/// Outcome of [`WorkerPool::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Exited on their own with status 0
    pub exited: usize,
    /// Exited on their own with a failure status, or could not be waited on
    pub failed: usize,
    /// Killed after the grace window
    pub forced: usize,
}

/// The running worker processes of one run
pub struct WorkerPool {
    workers: Vec<WorkerProcess>,
}

impl WorkerPool {
    /// Spawn one worker per CPU; slot `i` runs on `cpus[i]`
    ///
    /// Either every worker starts or none stays running: on a spawn failure
    /// the workers already started are killed before the error is returned.
    ///
    /// # Errors
    /// Returns [`RunError::WorkerSpawn`] for the first worker that fails to
    /// start
    pub async fn spawn(spec: &WorkerSpawnSpec, cpus: &[CpuId]) -> Result<Self, RunError> {
        let mut workers = Vec::with_capacity(cpus.len());

        for (index, &cpu) in cpus.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)] // bounded by MAX_SLOTS
            let slot = SlotIndex(index as u32);
            match spawn_worker(spec, slot, cpu) {
                Ok(child) => {
                    debug!("Spawned {slot} on {cpu} (pid {:?})", child.id());
                    workers.push(WorkerProcess { slot, cpu, child });
                }
                Err(source) => {
                    error!("Failed to spawn {slot}: {source}");
                    let partial = WorkerPool { workers };
                    partial.kill_all().await;
                    return Err(RunError::WorkerSpawn { slot, source });
                }
            }
        }

        info!("Spawned {} workers", workers.len());
        Ok(Self { workers })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// PIDs of workers that have not been reaped yet
    #[must_use]
    pub fn pids(&self) -> Vec<Pid> {
        self.workers.iter().filter_map(|w| w.child.id()).map(Pid).collect()
    }

    /// Wait for every worker to exit, killing stragglers after `grace`
    ///
    /// The caller must already have raised the stop flags. All workers share
    /// one deadline, so the whole call takes at most `grace` plus a short
    /// reap timeout per forced worker.
    pub async fn shutdown(self, grace: Duration) -> ShutdownReport {
        let deadline = Instant::now() + grace;
        let mut report = ShutdownReport::default();

        for mut worker in self.workers {
            match timeout_at(deadline, worker.child.wait()).await {
                Ok(Ok(status)) if status.success() => {
                    debug!("{} exited", worker.slot);
                    report.exited += 1;
                }
                Ok(Ok(status)) => {
                    warn!("{} on {} exited with {status}", worker.slot, worker.cpu);
                    report.failed += 1;
                }
                Ok(Err(e)) => {
                    warn!("Failed to wait for {}: {e}", worker.slot);
                    report.failed += 1;
                }
                Err(_) => {
                    error!(
                        "{} on {} did not exit within {grace:?}; killing it",
                        worker.slot, worker.cpu
                    );
                    force_kill(&mut worker).await;
                    report.forced += 1;
                }
            }
        }

        report
    }

    async fn kill_all(self) {
        for mut worker in self.workers {
            force_kill(&mut worker).await;
        }
    }
}

fn spawn_worker(spec: &WorkerSpawnSpec, slot: SlotIndex, cpu: CpuId) -> std::io::Result<Child> {
    let mut cmd = Command::new(&spec.executable);
    cmd.arg("worker")
        .arg("--register")
        .arg(&spec.register)
        .arg("--slot")
        .arg(slot.0.to_string())
        .arg("--window-ms")
        .arg(spec.window.as_millis().to_string());
    if spec.pin {
        cmd.arg("--cpu").arg(cpu.0.to_string());
    }
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::inherit()).kill_on_drop(true);
    cmd.spawn()
}

async fn force_kill(worker: &mut WorkerProcess) {
    if let Err(e) = worker.child.start_kill() {
        // Already exited between the timeout and the kill
        debug!("{}: kill failed: {e}", worker.slot);
    }
    if timeout(KILL_REAP_TIMEOUT, worker.child.wait()).await.is_err() {
        error!("{} could not be reaped after SIGKILL", worker.slot);
    }
}
