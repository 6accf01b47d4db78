//! # Metrics Sampling
//!
//! Every sample interval the sampler reads three independent sources and
//! hands one [`Sample`] to the recorder:
//!
//! | field       | source                                   | when missing |
//! |-------------|------------------------------------------|--------------|
//! | load        | `/proc/stat` aggregate `cpu` line        | tick fault   |
//! | temperature | thermal zones and hwmon `temp*_input`    | `None`       |
//! | power       | RAPL `package-0` `energy_uj`             | `None`       |
//!
//! Each read runs on the blocking pool under a timeout, so a stuck sysfs
//! file costs one sensor timeout and never stalls the tick loop.

pub mod cpu_load;
pub mod energy;
pub mod probe;
pub mod thermal;

use log::{debug, error, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::controller::LoopExit;
use crate::domain::SensorError;
use crate::fault::{publish_fault, FaultSlot, FaultTracker};
use crate::session::{lock_recorder, Sample, SessionRecorder};

pub use cpu_load::{load_between, CpuTimes};
pub use energy::{energy_delta, EnergyMeter, EnergyReading, RaplCounter};
pub use probe::SysfsProbe;
pub use thermal::ThermalSensors;

/// Raw sensor reads; every method may block on file I/O
pub trait MetricsProbe: Send + Sync + 'static {
    /// Cumulative CPU time counters
    ///
    /// # Errors
    /// Returns an error if the counters cannot be read
    fn cpu_times(&self) -> Result<CpuTimes, SensorError>;

    /// Current temperature in °C, `Ok(None)` if no sensor is available
    ///
    /// # Errors
    /// Returns an error if sensors exist but none could be read
    fn temperature(&self) -> Result<Option<f64>, SensorError>;

    /// Current energy counter, `Ok(None)` if there is no counter
    ///
    /// # Errors
    /// Returns an error if the counter exists but cannot be read
    fn energy(&self) -> Result<Option<EnergyReading>, SensorError>;
}

/// Turns raw probe readings into [`Sample`]s
pub struct MetricsSampler {
    probe: Arc<dyn MetricsProbe>,
    sensor_timeout: Duration,
    cpu_baseline: Option<CpuTimes>,
    last_load: f64,
    energy: EnergyMeter,
    /// Reference point for energy read times
    origin: Instant,
    power_enabled: bool,
}

impl MetricsSampler {
    #[must_use]
    pub fn new(probe: Arc<dyn MetricsProbe>, sensor_timeout: Duration) -> Self {
        Self {
            probe,
            sensor_timeout,
            cpu_baseline: None,
            last_load: 0.0,
            energy: EnergyMeter::new(),
            origin: Instant::now(),
            power_enabled: true,
        }
    }

    /// Take the baseline readings the first sample is measured against
    pub async fn prime(&mut self) {
        match self.read(|p| p.cpu_times(), "cpu load").await {
            Ok(times) => self.cpu_baseline = Some(times),
            Err(e) => warn!("No CPU load baseline: {e}"),
        }
        self.read_power().await;
    }

    /// Whether power readings are still being attempted this run
    #[must_use]
    pub fn power_enabled(&self) -> bool {
        self.power_enabled
    }

    /// Read all sources and build the sample for `elapsed`
    ///
    /// # Errors
    /// Returns an error only if the load counters could not be read, even on
    /// retry. Temperature and power degrade to `None` instead.
    pub async fn sample(&mut self, elapsed: Duration) -> Result<Sample, SensorError> {
        let times = match self.read(|p| p.cpu_times(), "cpu load").await {
            Ok(times) => times,
            Err(e) => {
                debug!("CPU load read failed, retrying: {e}");
                self.read(|p| p.cpu_times(), "cpu load").await?
            }
        };

        let baseline = self.cpu_baseline.replace(times).unwrap_or_default();
        let load_percent = load_between(&baseline, &times).unwrap_or(self.last_load);
        self.last_load = load_percent;

        let temperature_celsius = match self.read(|p| p.temperature(), "temperature").await {
            Ok(celsius) => celsius,
            Err(e) => {
                debug!("Temperature unavailable this tick: {e}");
                None
            }
        };

        let power_watts = self.read_power().await;

        Ok(Sample { elapsed, load_percent, temperature_celsius, power_watts })
    }

    /// Watts since the previous counter read, timed by when each read
    /// actually happened
    async fn read_power(&mut self) -> Option<f64> {
        if !self.power_enabled {
            return None;
        }
        let timed = |p: &dyn MetricsProbe| p.energy().map(|r| r.map(|r| (r, Instant::now())));
        match self.read(timed, "energy").await {
            Ok(Some((reading, read_at))) => {
                self.energy.update(reading, read_at.saturating_duration_since(self.origin))
            }
            Ok(None) => None,
            Err(e @ (SensorError::Timeout { .. } | SensorError::TaskFailed { .. })) => {
                debug!("Energy counter skipped this tick: {e}");
                None
            }
            Err(e) => {
                warn!("Power readings disabled for this run: {e}");
                self.power_enabled = false;
                None
            }
        }
    }

    async fn read<T, F>(&self, read: F, what: &'static str) -> Result<T, SensorError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MetricsProbe) -> Result<T, SensorError> + Send + 'static,
    {
        let probe = Arc::clone(&self.probe);
        let task = tokio::task::spawn_blocking(move || read(probe.as_ref()));
        match timeout(self.sensor_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(SensorError::TaskFailed { what, detail: join.to_string() }),
            Err(_) => Err(SensorError::Timeout { what, limit: self.sensor_timeout }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerReport {
    pub exit: LoopExit,
    pub ticks: u64,
    /// Samples the recorder accepted
    pub recorded: u64,
    pub failed_ticks: u64,
}

/// Sample every `interval` after `start` until `shutdown` flips
///
/// Sample times are measured from `start`, the same instant the session
/// and the controller count from.
pub async fn run_sampling_loop(
    mut sampler: MetricsSampler,
    recorder: Arc<Mutex<SessionRecorder>>,
    interval: Duration,
    start: Instant,
    fault_threshold: u32,
    mut shutdown: watch::Receiver<bool>,
    faults: Arc<FaultSlot>,
) -> SamplerReport {
    let mut ticker = interval_at(start + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tracker = FaultTracker::new("sampler", fault_threshold);
    let mut ticks = 0;
    let mut recorded = 0;

    let exit = loop {
        if *shutdown.borrow_and_update() {
            break LoopExit::Shutdown;
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    break LoopExit::Shutdown;
                }
            }
            now = ticker.tick() => {
                ticks += 1;
                let elapsed = now.saturating_duration_since(start);
                match sampler.sample(elapsed).await {
                    Ok(sample) => {
                        tracker.record_ok();
                        if lock_recorder(&recorder).record_sample(sample) {
                            recorded += 1;
                        }
                    }
                    Err(e) => {
                        if let Some(fault) = tracker.record_fault(&e) {
                            error!("{fault}; sampling stopped");
                            publish_fault(&faults, fault);
                            break LoopExit::Faulted;
                        }
                    }
                }
            }
        }
    };

    SamplerReport { exit, ticks, recorded, failed_ticks: tracker.total() }
}
