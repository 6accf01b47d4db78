//! # Run Engine
//!
//! The control surface a shell drives: `start`, `stop`, `add_marker` and
//! read access to the samples and markers of the current session.
//!
//! ## Start
//!
//! 1. Validate the profile and configuration (nothing is spawned on error)
//! 2. Create the control register with one slot per online CPU
//! 3. Spawn one worker process per slot
//! 4. Prime the sampler, begin a new session
//! 5. Spawn the controller and sampler tasks on a shared start instant
//!
//! ## Stop
//!
//! 1. Controller drives every target to 0 and raises the stop flags
//! 2. Workers get `worker_grace` to exit, stragglers are killed
//! 3. Sampler stops ticking
//! 4. Session is sealed (`Completed`, or `Failed` after a run fault)
//!
//! Each step has a bounded wait, so `stop` always returns.

use log::{error, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::config::RunConfig;
use crate::controller::{run_control_loop, ControllerReport, ProfileController};
use crate::domain::{Percent, Pid, RecorderError, RunError, RunFault, SlotIndex};
use crate::fault::FaultSlot;
use crate::profile::LoadProfile;
use crate::register::{ControlRegister, TargetSink};
use crate::sampling::{run_sampling_loop, MetricsProbe, MetricsSampler, SamplerReport, SysfsProbe};
use crate::session::{lock_recorder, Marker, Sample, Session, SessionOutcome, SessionRecorder};
use crate::system::worker_cpus;
use crate::worker::{ShutdownReport, WorkerPool, WorkerSpawnSpec};

/// Bound on waiting for the controller task to quiesce the register
const CONTROLLER_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Distinguishes registers of successive runs within one process
static RUN_SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// What `stop` observed while tearing a run down
#[derive(Debug, Clone)]
pub struct StopReport {
    pub elapsed: Duration,
    pub controller_writes: u64,
    /// `false` if the controller task had to be aborted
    pub controller_clean: bool,
    pub workers: ShutdownReport,
    pub samples: usize,
    pub markers: usize,
    pub fault: Option<RunFault>,
}

struct ActiveRun {
    register: Arc<ControlRegister>,
    pool: WorkerPool,
    controller: JoinHandle<ControllerReport>,
    sampler: JoinHandle<SamplerReport>,
    stop_controller: watch::Sender<bool>,
    stop_sampler: watch::Sender<bool>,
    faults: Arc<FaultSlot>,
    started: Instant,
}

pub struct Engine {
    config: RunConfig,
    probe: Arc<dyn MetricsProbe>,
    recorder: Arc<Mutex<SessionRecorder>>,
    active: Option<ActiveRun>,
}

impl Engine {
    /// Engine reading the real sensors of this machine
    ///
    /// # Errors
    /// Returns [`RunError::Config`] if `config` is invalid
    pub fn new(config: RunConfig) -> Result<Self, RunError> {
        Self::with_probe(config, Arc::new(SysfsProbe::discover()))
    }

    /// Engine reading sensors through `probe`
    ///
    /// # Errors
    /// Returns [`RunError::Config`] if `config` is invalid
    pub fn with_probe(config: RunConfig, probe: Arc<dyn MetricsProbe>) -> Result<Self, RunError> {
        config.validate()?;
        Ok(Self {
            config,
            probe,
            recorder: Arc::new(Mutex::new(SessionRecorder::new())),
            active: None,
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Start a run of `profile` on every online CPU
    ///
    /// Any previous session is replaced.
    ///
    /// # Errors
    /// Returns an error if a run is active, the profile is invalid, or the
    /// register or workers cannot be set up. Nothing is left running on
    /// error.
    pub async fn start(&mut self, profile: LoadProfile) -> Result<(), RunError> {
        if self.active.is_some() {
            return Err(RunError::AlreadyRunning);
        }
        profile.validate()?;

        let cpus = worker_cpus();
        if cpus.is_empty() {
            return Err(RunError::NoCpus);
        }

        let os_id = format!(
            "loadscope_{}_{}",
            std::process::id(),
            RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        let register = Arc::new(ControlRegister::create(&os_id, cpus.len())?);

        let spec = WorkerSpawnSpec {
            executable: self.config.worker_exe.clone(),
            register: register.os_id().to_string(),
            window: self.config.duty_window,
            pin: self.config.pin_workers,
        };
        // Dropping the register on error unlinks it
        let pool = WorkerPool::spawn(&spec, &cpus).await?;

        let mut sampler = MetricsSampler::new(Arc::clone(&self.probe), self.config.sensor_timeout);
        sampler.prime().await;

        let started = Instant::now();
        let mut controller = ProfileController::new();
        controller.start(profile.clone(), started)?;
        lock_recorder(&self.recorder).begin(profile.clone(), cpus.len(), started);

        let (stop_controller, controller_rx) = watch::channel(false);
        let (stop_sampler, sampler_rx) = watch::channel(false);
        let faults = Arc::new(watch::channel(None).0);

        let sink: Arc<dyn TargetSink> = register.clone();
        let controller = tokio::spawn(run_control_loop(
            controller,
            sink,
            self.config.control_tick,
            self.config.fault_threshold,
            controller_rx,
            Arc::clone(&faults),
        ));
        let sampler = tokio::spawn(run_sampling_loop(
            sampler,
            Arc::clone(&self.recorder),
            self.config.sample_interval,
            started,
            self.config.fault_threshold,
            sampler_rx,
            Arc::clone(&faults),
        ));

        info!("Run started: {profile} on {} workers", pool.len());
        self.active = Some(ActiveRun {
            register,
            pool,
            controller,
            sampler,
            stop_controller,
            stop_sampler,
            faults,
            started,
        });
        Ok(())
    }

    /// Stop the active run and seal its session
    ///
    /// # Errors
    /// Returns [`RunError::NotRunning`] if there is no active run
    pub async fn stop(&mut self) -> Result<StopReport, RunError> {
        let run = self.active.take().ok_or(RunError::NotRunning)?;
        let ActiveRun {
            register,
            pool,
            mut controller,
            mut sampler,
            stop_controller,
            stop_sampler,
            faults,
            started,
        } = run;
        let elapsed = started.elapsed();

        // The controller quiesces the register on its way out
        let _ = stop_controller.send(true);

        let (controller_writes, controller_clean) =
            match timeout(CONTROLLER_STOP_TIMEOUT, &mut controller).await {
                Ok(Ok(report)) => (report.writes, true),
                Ok(Err(e)) => {
                    error!("Controller task failed: {e}; quiescing register directly");
                    register.quiesce();
                    (0, false)
                }
                Err(_) => {
                    error!("Controller did not stop in time; quiescing register directly");
                    controller.abort();
                    // Abort only lands at an await point; wait so there is
                    // never a second writer
                    let _ = controller.await;
                    register.quiesce();
                    (0, false)
                }
            };

        let workers = pool.shutdown(self.config.worker_grace).await;
        if workers.forced > 0 {
            warn!("{} workers had to be killed", workers.forced);
        }

        // The sampler keeps recording while the workers wind down
        let _ = stop_sampler.send(true);
        let sampler_limit = self.config.sensor_timeout * 4 + self.config.sample_interval;
        if timeout(sampler_limit, &mut sampler).await.is_err() {
            warn!("Sampler did not stop in time; aborting it");
            sampler.abort();
        }

        let fault = faults.borrow().clone();
        let outcome = match &fault {
            Some(fault) => SessionOutcome::Failed { reason: fault.to_string() },
            None => SessionOutcome::Completed,
        };

        let mut recorder = lock_recorder(&self.recorder);
        recorder.seal(outcome);
        let report = StopReport {
            elapsed,
            controller_writes,
            controller_clean,
            workers,
            samples: recorder.samples().len(),
            markers: recorder.markers().len(),
            fault,
        };
        drop(recorder);

        info!(
            "Run stopped after {:.1}s: {} samples, {} markers",
            report.elapsed.as_secs_f64(),
            report.samples,
            report.markers
        );
        Ok(report)
    }

    /// Pin a note to the current point of the run
    ///
    /// # Errors
    /// Returns [`RecorderError::NotRecording`] when no run is active
    pub fn add_marker(&self, note: &str) -> Result<Marker, RecorderError> {
        lock_recorder(&self.recorder).add_marker(note)
    }

    /// Samples of the current (or last sealed) session
    #[must_use]
    pub fn current_samples(&self) -> Vec<Sample> {
        lock_recorder(&self.recorder).samples().to_vec()
    }

    /// Markers of the current (or last sealed) session
    #[must_use]
    pub fn current_markers(&self) -> Vec<Marker> {
        lock_recorder(&self.recorder).markers().to_vec()
    }

    /// Most recent sample and the number of samples so far
    #[must_use]
    pub fn latest_sample(&self) -> Option<(usize, Sample)> {
        let recorder = lock_recorder(&self.recorder);
        let samples = recorder.samples();
        samples.last().map(|s| (samples.len(), s.clone()))
    }

    /// Snapshot of the current (or last sealed) session
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        lock_recorder(&self.recorder).session().cloned()
    }

    /// PIDs of the worker processes of the active run
    #[must_use]
    pub fn worker_pids(&self) -> Vec<Pid> {
        self.active.as_ref().map(|run| run.pool.pids()).unwrap_or_default()
    }

    /// Target currently published to the workers
    #[must_use]
    pub fn current_target(&self) -> Option<Percent> {
        let run = self.active.as_ref()?;
        run.register.target(SlotIndex(0)).ok()
    }

    /// Fault recorded by the active run so far, if any
    #[must_use]
    pub fn current_fault(&self) -> Option<RunFault> {
        self.active.as_ref().and_then(|run| run.faults.borrow().clone())
    }

    /// Resolves once a periodic task of the active run gives up
    ///
    /// Never resolves if there is no active run or the run ends cleanly.
    /// The returned future does not borrow the engine.
    pub fn fault(&self) -> impl Future<Output = RunFault> + Send + 'static {
        let rx = self.active.as_ref().map(|run| run.faults.subscribe());
        async move {
            let fault = match rx {
                Some(mut rx) => rx.wait_for(Option::is_some).await.ok().and_then(|f| (*f).clone()),
                None => None,
            };
            match fault {
                Some(fault) => fault,
                None => std::future::pending().await,
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(run) = self.active.take() {
            warn!("Engine dropped during a run; stopping workers");
            run.controller.abort();
            run.sampler.abort();
            run.register.quiesce();
            // Remaining workers are killed when the pool drops
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::tests::FakeProbe;
    use std::path::PathBuf;

    fn engine_with(exe: &str) -> Engine {
        let config = RunConfig::new(PathBuf::from(exe));
        Engine::with_probe(config, Arc::new(FakeProbe::healthy())).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_profile_spawns_nothing() {
        let mut engine = engine_with("/nonexistent/loadscope");
        let err = engine.start(LoadProfile::Constant { percent: -1.0 }).await.unwrap_err();
        assert!(matches!(err, RunError::Profile(_)));
        assert!(!engine.is_running());
        assert!(engine.session().is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_no_run() {
        let mut engine = engine_with("/nonexistent/loadscope");
        let err = engine.start(LoadProfile::Constant { percent: 50.0 }).await.unwrap_err();
        assert!(matches!(err, RunError::WorkerSpawn { .. }));
        assert!(!engine.is_running());
        assert!(engine.worker_pids().is_empty());
    }

    #[tokio::test]
    async fn test_stop_and_marker_need_a_run() {
        let mut engine = engine_with("/nonexistent/loadscope");
        assert!(matches!(engine.stop().await, Err(RunError::NotRunning)));
        assert_eq!(engine.add_marker("idle"), Err(RecorderError::NotRecording));
        assert!(engine.current_samples().is_empty());
        assert!(engine.current_fault().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RunConfig::new(PathBuf::from("/bin/true"));
        config.fault_threshold = 0;
        assert!(matches!(
            Engine::with_probe(config, Arc::new(FakeProbe::healthy())),
            Err(RunError::Config(_))
        ));
    }
}
