//! # loadscope - Duty-Cycled CPU Load Generator with Metrics Recording
//!
//! loadscope drives every logical core to a target utilization that follows
//! a selectable profile over time, while a sampler records CPU load,
//! temperature and package power into a session that can be exported.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Controlling process (tokio)                  │
//! │                                                                 │
//! │  ┌──────────────┐  tick   ┌──────────────┐                      │
//! │  │   Profile    │────────▶│   Control    │◀── shared memory ──┐ │
//! │  │  Controller  │ publish │   Register   │                    │ │
//! │  └──────────────┘         └──────────────┘                    │ │
//! │                                                               │ │
//! │  ┌──────────────┐  Sample ┌──────────────┐   ┌────────────┐   │ │
//! │  │   Metrics    │────────▶│   Session    │──▶│   Export   │   │ │
//! │  │   Sampler    │         │   Recorder   │   │ (csv/json) │   │ │
//! │  └──────┬───────┘         └──────────────┘   └────────────┘   │ │
//! │         │ /proc/stat, thermal zones, RAPL energy_uj           │ │
//! └─────────┼─────────────────────────────────────────────────────┼─┘
//!           ▼                                                     │
//!      kernel counters          ┌──────────┐ ┌──────────┐ ┌──────────┐
//!                               │ worker 0 │ │ worker 1 │ │ worker N │
//!                               │ (CPU 0)  │ │ (CPU 1)  │ │ (CPU N)  │
//!                               └──────────┘ └──────────┘ └──────────┘
//!                               one process per logical core, duty-cycled
//! ```
//!
//! ## Module Structure
//!
//! ### Load generation
//!
//! - [`profile`]: `Constant`, `Pulsed` and `Ramp` load profiles and their
//!   target-at-elapsed-time math
//! - [`register`]: the lock-free control register shared with workers
//! - [`controller`]: profile controller state machine and its tick loop
//! - [`worker`]: the duty-cycle loop run inside each worker process, plus
//!   the pool that spawns and reaps those processes
//!
//! ### Measurement
//!
//! - [`sampling`]: CPU load, temperature and energy probes and the sampler
//!   tick loop
//! - [`session`]: samples, markers and the recorder that seals them
//! - [`export`]: CSV and JSON serialization of a session
//!
//! ### Glue
//!
//! - [`engine`]: the run control surface (`start`, `stop`, `add_marker`, ...)
//! - [`config`]: tuning parameters (tick intervals, window length, timeouts)
//! - [`fault`]: consecutive-failure tracking for the periodic tasks
//! - [`cli`]: command-line argument parsing
//! - [`preflight`]: environment checks before a run
//! - [`display`]: status line formatting for headless output
//! - [`domain`]: newtypes and error enums
//! - [`system`]: online CPU discovery
//!
//! ## Concurrency Model
//!
//! Load generation needs real parallelism, so every core gets its own
//! process. The controller and the sampler are ordinary periodic tasks on the
//! controlling process. The register is the only state crossing the process
//! boundary and every field in it has exactly one writer.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Hold every core at 50% for 30 seconds and export the session
//! loadscope run --profile constant --load 50 --duration 30 --export run.csv
//!
//! # Square wave between 90% and 10%, 10 second period
//! loadscope run --profile pulsed --high 90 --low 10 --period 10
//!
//! # Re-read an exported session
//! loadscope summarize run.csv
//! ```

pub mod cli;
pub mod config;
pub mod controller;
pub mod display;
pub mod domain;
pub mod engine;
pub mod export;
pub mod fault;
pub mod preflight;
pub mod profile;
pub mod register;
pub mod sampling;
pub mod session;
pub mod system;
pub mod worker;
