//! # loadscope - Main Entry Point
//!
//! Three subcommands:
//! - **run**: drive every core through a load profile, record metrics,
//!   export on exit
//! - **summarize**: statistics for a previously exported CSV
//! - **worker** (hidden): the per-core duty-cycle loop, spawned by `run`

// Main function is intentionally long for clarity
#![allow(clippy::too_many_lines)]

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, warn};
use std::io::BufRead;
use std::path::Path;
use std::time::{Duration, Instant};

use loadscope::cli::{Args, Command, RunArgs, WorkerArgs};
use loadscope::display::{display_stop_report, format_marker, format_sample};
use loadscope::domain::{Percent, RunError};
use loadscope::engine::Engine;
use loadscope::export::{parse_file, write_csv_file, write_json_file, SessionSummary};
use loadscope::preflight::run_preflight_checks;
use loadscope::worker::run_worker;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

/// How often the run loop checks markers, status and the duration limit
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stdin lines buffered before the reader thread blocks
const MARKER_QUEUE: usize = 64;

/// Bad flag values that clap itself cannot reject
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct UsageError(String);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<UsageError>().is_some()
        || matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::Profile(_) | RunError::Config(_))
        )
    {
        return EXIT_USAGE;
    }
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") || msg.contains("operation not permitted") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Worker(worker) => run_worker_process(&worker),
        Command::Summarize { file } => summarize(&file),
        Command::Run(run_args) => run_session(run_args),
    }
}

fn run_worker_process(args: &WorkerArgs) -> Result<()> {
    let summary = run_worker(&args.options())?;
    debug!(
        "Slot#{} exiting: {} windows, checksum {:#018x}",
        args.slot, summary.windows, summary.checksum
    );
    Ok(())
}

fn summarize(path: &Path) -> Result<()> {
    let parsed =
        parse_file(path).with_context(|| format!("Failed to read session {}", path.display()))?;
    println!("{}", SessionSummary::from_parts(&parsed.samples, &parsed.markers));
    Ok(())
}

/// Forward non-empty stdin lines until EOF
fn read_marker_lines(tx: &Sender<String>) {
    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        let note = line.trim();
        if note.is_empty() {
            continue;
        }
        if tx.send(note.to_string()).is_err() {
            break;
        }
    }
    debug!("Marker input closed");
}

fn drain_markers(engine: &Engine, rx: &Receiver<String>, quiet: bool) {
    while let Ok(note) = rx.try_recv() {
        match engine.add_marker(&note) {
            Ok(marker) => {
                if !quiet {
                    println!("{}", format_marker(&marker));
                }
            }
            Err(e) => warn!("Marker {note:?} dropped: {e}"),
        }
    }
}

#[tokio::main]
async fn run_session(args: RunArgs) -> Result<()> {
    let quiet = args.quiet;
    let profile = args.profile().map_err(UsageError)?;
    let limit = args.run_limit().map_err(UsageError)?;
    profile.validate().map_err(RunError::from)?;

    let worker_exe =
        std::env::current_exe().context("Failed to locate the loadscope executable")?;
    let config = args.run_config(worker_exe);
    config.validate()?;

    run_preflight_checks(&config.worker_exe, quiet)?;

    if !quiet {
        println!("loadscope v{}", env!("CARGO_PKG_VERSION"));
        println!("profile: {profile}");
    }

    let mut engine = Engine::new(config)?;
    engine.start(profile).await?;

    if !quiet {
        println!("workers: {}", engine.worker_pids().len());
        if let Some(path) = &args.export {
            println!("export: {}", path.display());
        }
        if let Some(limit) = limit {
            println!("duration: {:.1}s", limit.as_secs_f64());
        }
        println!("type a line + Enter to add a marker, Ctrl+C to stop");
    }

    // Stdin reader thread; it may stay blocked on read until the process exits
    let (marker_tx, marker_rx) = bounded(MARKER_QUEUE);
    std::thread::spawn(move || read_marker_lines(&marker_tx));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let fault = engine.fault();
    tokio::pin!(fault);

    let run_start = Instant::now();
    let mut printed = 0;

    let exit_reason = loop {
        if let Some(limit) = limit {
            if run_start.elapsed() >= limit {
                break "duration limit reached";
            }
        }

        drain_markers(&engine, &marker_rx, quiet);

        if !quiet {
            if let Some((count, sample)) = engine.latest_sample() {
                if count != printed {
                    let target = engine.current_target().map(Percent::value);
                    println!("{}", format_sample(&sample, target));
                    printed = count;
                }
            }
        }

        tokio::select! {
            () = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = &mut ctrl_c => break "interrupted",
            fault = &mut fault => {
                eprintln!("error: {fault}");
                break "run aborted";
            }
        }
    };

    // Markers typed right before the stop still belong to the run
    drain_markers(&engine, &marker_rx, quiet);
    let report = engine.stop().await?;
    if !quiet || report.fault.is_some() {
        display_stop_report(exit_reason, &report);
    }

    let samples = engine.current_samples();
    let markers = engine.current_markers();

    if let Some(path) = &args.export {
        write_csv_file(path, &samples, &markers)
            .with_context(|| format!("Failed to export CSV to {}", path.display()))?;
        if !quiet {
            println!("saved: {}", path.display());
        }
    }

    if let Some(path) = &args.json {
        if let Some(session) = engine.session() {
            write_json_file(path, &session)
                .with_context(|| format!("Failed to export JSON to {}", path.display()))?;
            if !quiet {
                println!("saved: {}", path.display());
            }
        }
    }

    if !quiet {
        println!("\n{}", SessionSummary::from_parts(&samples, &markers));
    }

    if let Some(fault) = report.fault {
        bail!("run aborted: {fault}");
    }
    Ok(())
}
