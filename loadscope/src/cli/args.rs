//! CLI argument definitions

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    RunConfig, DEFAULT_CONTROL_TICK, DEFAULT_DUTY_WINDOW, DEFAULT_FAULT_THRESHOLD,
    DEFAULT_SAMPLE_INTERVAL, DEFAULT_SENSOR_TIMEOUT, DEFAULT_WORKER_GRACE,
};
use crate::domain::{CpuId, SlotIndex};
use crate::profile::LoadProfile;
use crate::worker::WorkerOptions;

/// Ramp length when neither `--ramp-duration` nor `--duration` is given
const DEFAULT_RAMP_SECS: f64 = 60.0;

#[derive(Parser)]
#[command(
    name = "loadscope",
    version,
    about = "Generate controlled CPU load and record load, temperature and power",
    after_help = "\
EXAMPLES:
    loadscope run --load 50 --duration 30 --export run.csv
    loadscope run --profile pulsed --high 90 --low 10 --period 10
    loadscope run --profile ramp --start 10 --end 100 --duration 120 --json run.json
    loadscope summarize run.csv

While a run is active, every line typed on stdin is recorded as an event marker."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Drive all cores through a load profile while recording metrics
    Run(RunArgs),

    /// Print statistics for an exported CSV session
    Summarize {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Internal: duty-cycle loop of one worker process
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProfileKind {
    Constant,
    Pulsed,
    Ramp,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Shape of the target load over time
    #[arg(long, value_enum, default_value = "constant")]
    pub profile: ProfileKind,

    /// Target load for the constant profile (percent)
    #[arg(long, default_value = "80")]
    pub load: f64,

    /// High phase of the pulsed profile (percent)
    #[arg(long, default_value = "90")]
    pub high: f64,

    /// Low phase of the pulsed profile (percent)
    #[arg(long, default_value = "10")]
    pub low: f64,

    /// Pulse period in seconds
    #[arg(long, default_value = "10")]
    pub period: f64,

    /// Ramp start load (percent)
    #[arg(long, default_value = "10")]
    pub start: f64,

    /// Ramp end load (percent)
    #[arg(long, default_value = "100")]
    pub end: f64,

    /// Ramp length in seconds (defaults to --duration, or 60)
    #[arg(long, value_name = "SECS")]
    pub ramp_duration: Option<f64>,

    /// Stop after N seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "0", value_name = "SECS")]
    pub duration: f64,

    #[arg(long, default_value_t = millis(DEFAULT_CONTROL_TICK), value_name = "MS")]
    pub control_tick_ms: u64,

    #[arg(long, default_value_t = millis(DEFAULT_SAMPLE_INTERVAL), value_name = "MS")]
    pub sample_ms: u64,

    /// Length of one busy/idle window in the workers
    #[arg(long, default_value_t = millis(DEFAULT_DUTY_WINDOW), value_name = "MS")]
    pub window_ms: u64,

    /// How long workers get to exit before being killed
    #[arg(long, default_value_t = millis(DEFAULT_WORKER_GRACE), value_name = "MS")]
    pub grace_ms: u64,

    /// Upper bound on a single sensor read
    #[arg(long, default_value_t = millis(DEFAULT_SENSOR_TIMEOUT), value_name = "MS")]
    pub sensor_timeout_ms: u64,

    /// Consecutive failed ticks before the run is aborted
    #[arg(long, default_value_t = DEFAULT_FAULT_THRESHOLD)]
    pub fault_threshold: u32,

    /// Let the scheduler place workers instead of pinning one per CPU
    #[arg(long)]
    pub no_pin: bool,

    /// Export the session as CSV when the run ends
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Export the session as JSON when the run ends
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,

    /// Suppress status lines
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct WorkerArgs {
    /// Shared memory name of the control register
    #[arg(long)]
    pub register: String,

    #[arg(long)]
    pub slot: u32,

    #[arg(long)]
    pub window_ms: u64,

    /// CPU to pin this worker to
    #[arg(long)]
    pub cpu: Option<u32>,
}

#[allow(clippy::cast_possible_truncation)]
fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

fn secs(field: &'static str, value: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| format!("{field} must be a non-negative number of seconds, got {value}"))
}

impl RunArgs {
    /// Build the load profile selected by `--profile`
    ///
    /// Percentages are passed through unchecked; the engine rejects them
    /// with a descriptive error.
    ///
    /// # Errors
    /// Returns an error if a duration flag is negative or not a number
    pub fn profile(&self) -> Result<LoadProfile, String> {
        Ok(match self.profile {
            ProfileKind::Constant => LoadProfile::Constant { percent: self.load },
            ProfileKind::Pulsed => LoadProfile::Pulsed {
                high_percent: self.high,
                low_percent: self.low,
                period: secs("--period", self.period)?,
            },
            ProfileKind::Ramp => {
                let ramp = match self.ramp_duration {
                    Some(d) => d,
                    None if self.duration > 0.0 => self.duration,
                    None => DEFAULT_RAMP_SECS,
                };
                LoadProfile::Ramp {
                    start_percent: self.start,
                    end_percent: self.end,
                    duration: secs("--ramp-duration", ramp)?,
                }
            }
        })
    }

    /// Auto-stop limit, `None` to run until interrupted
    ///
    /// # Errors
    /// Returns an error if `--duration` is negative or not a number
    pub fn run_limit(&self) -> Result<Option<Duration>, String> {
        let limit = secs("--duration", self.duration)?;
        Ok((!limit.is_zero()).then_some(limit))
    }

    /// Tuning parameters, with workers spawned from `worker_exe`
    #[must_use]
    pub fn run_config(&self, worker_exe: PathBuf) -> RunConfig {
        RunConfig {
            control_tick: Duration::from_millis(self.control_tick_ms),
            sample_interval: Duration::from_millis(self.sample_ms),
            duty_window: Duration::from_millis(self.window_ms),
            worker_grace: Duration::from_millis(self.grace_ms),
            sensor_timeout: Duration::from_millis(self.sensor_timeout_ms),
            fault_threshold: self.fault_threshold,
            pin_workers: !self.no_pin,
            worker_exe,
        }
    }
}

impl WorkerArgs {
    #[must_use]
    pub fn options(&self) -> WorkerOptions {
        WorkerOptions {
            register: self.register.clone(),
            slot: SlotIndex(self.slot),
            window: Duration::from_millis(self.window_ms),
            cpu: self.cpu.map(CpuId),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["loadscope", "run"];
        full.extend_from_slice(argv);
        match Args::try_parse_from(full).unwrap().command {
            Command::Run(args) => args,
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_defaults() {
        let args = run_args(&[]);
        assert_eq!(args.profile().unwrap(), LoadProfile::Constant { percent: 80.0 });
        assert_eq!(args.run_limit().unwrap(), None);

        let config = args.run_config(PathBuf::from("/bin/loadscope"));
        assert_eq!(config.control_tick, DEFAULT_CONTROL_TICK);
        assert_eq!(config.sample_interval, DEFAULT_SAMPLE_INTERVAL);
        assert_eq!(config.duty_window, DEFAULT_DUTY_WINDOW);
        assert_eq!(config.worker_grace, DEFAULT_WORKER_GRACE);
        assert!(config.pin_workers);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pulsed_profile() {
        let args = run_args(&["--profile", "pulsed", "--high", "70", "--low", "20", "--period", "4"]);
        assert_eq!(
            args.profile().unwrap(),
            LoadProfile::Pulsed {
                high_percent: 70.0,
                low_percent: 20.0,
                period: Duration::from_secs(4),
            }
        );
    }

    #[test]
    fn test_ramp_follows_run_duration() {
        let args = run_args(&["--profile", "ramp", "--duration", "30"]);
        assert_eq!(
            args.profile().unwrap(),
            LoadProfile::Ramp {
                start_percent: 10.0,
                end_percent: 100.0,
                duration: Duration::from_secs(30),
            }
        );
        assert_eq!(args.run_limit().unwrap(), Some(Duration::from_secs(30)));

        let args = run_args(&["--profile", "ramp", "--ramp-duration", "5", "--duration", "30"]);
        assert!(matches!(
            args.profile().unwrap(),
            LoadProfile::Ramp { duration, .. } if duration == Duration::from_secs(5)
        ));
    }

    #[test]
    fn test_negative_duration_rejected() {
        let args = run_args(&["--duration=-3"]);
        assert!(args.run_limit().is_err());
    }

    #[test]
    fn test_worker_args() {
        let args = Args::try_parse_from([
            "loadscope", "worker", "--register", "loadscope_1_0", "--slot", "3", "--window-ms",
            "50", "--cpu", "7",
        ])
        .unwrap();
        let Command::Worker(worker) = args.command else { panic!("expected worker") };
        let options = worker.options();
        assert_eq!(options.slot, SlotIndex(3));
        assert_eq!(options.cpu, Some(CpuId(7)));
        assert_eq!(options.window, Duration::from_millis(50));
    }

    #[test]
    fn test_unknown_profile_is_usage_error() {
        assert!(Args::try_parse_from(["loadscope", "run", "--profile", "sine"]).is_err());
    }
}
