//! End-to-end runs with real worker processes

use std::path::PathBuf;
use std::time::Duration;

use loadscope::config::RunConfig;
use loadscope::domain::RunError;
use loadscope::engine::Engine;
use loadscope::export::{parse_csv, write_csv};
use loadscope::profile::LoadProfile;
use loadscope::session::SessionOutcome;

fn test_config() -> RunConfig {
    let mut config = RunConfig::new(PathBuf::from(env!("CARGO_BIN_EXE_loadscope")));
    config.sample_interval = Duration::from_millis(200);
    config.sensor_timeout = Duration::from_millis(150);
    config.duty_window = Duration::from_millis(50);
    config.pin_workers = false;
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_constant_run_records_and_exports() {
    let mut engine = Engine::new(test_config()).expect("valid config");
    engine.start(LoadProfile::Constant { percent: 50.0 }).await.expect("run should start");
    assert!(engine.is_running());
    let workers = engine.worker_pids().len();
    assert!(workers > 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.current_target().map(|t| t.value()), Some(50.0));
    engine.add_marker("first").expect("marker during run");
    tokio::time::sleep(Duration::from_millis(900)).await;
    engine.add_marker("second, with comma").expect("marker during run");

    let report = engine.stop().await.expect("stop should succeed");
    assert!(!engine.is_running());
    assert!(report.controller_clean);
    assert!(report.controller_writes >= 10, "only {} writes", report.controller_writes);
    assert_eq!(report.workers.exited, workers, "workers: {:?}", report.workers);
    assert_eq!(report.workers.forced, 0);
    assert!(report.fault.is_none());

    let session = engine.session().expect("sealed session");
    assert_eq!(session.outcome, SessionOutcome::Completed);
    assert_eq!(session.workers, workers);

    let samples = engine.current_samples();
    let markers = engine.current_markers();
    assert!(samples.len() >= 4, "only {} samples", samples.len());
    assert_eq!(markers.len(), 2);
    assert!(samples.windows(2).all(|w| w[0].elapsed < w[1].elapsed));
    assert!(markers.windows(2).all(|w| w[0].elapsed < w[1].elapsed));
    assert!(samples.iter().all(|s| (0.0..=100.0).contains(&s.load_percent)));

    // Sealed: markers are rejected after stop
    assert!(engine.add_marker("late").is_err());

    let mut csv = Vec::new();
    write_csv(&mut csv, &samples, &markers).expect("csv export");
    let csv = String::from_utf8(csv).expect("utf-8");
    assert_eq!(csv.lines().count(), samples.len() + markers.len() + 3);

    let parsed = parse_csv(&csv).expect("export parses back");
    assert_eq!(parsed.samples.len(), samples.len());
    assert_eq!(parsed.markers.len(), markers.len());
    assert_eq!(parsed.markers[1].note, "second, with comma");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_start_rejected_and_next_run_replaces_session() {
    let mut engine = Engine::new(test_config()).expect("valid config");
    engine.start(LoadProfile::Constant { percent: 20.0 }).await.expect("run should start");
    assert!(matches!(
        engine.start(LoadProfile::Constant { percent: 30.0 }).await,
        Err(RunError::AlreadyRunning)
    ));
    tokio::time::sleep(Duration::from_millis(450)).await;
    engine.add_marker("only in first run").expect("marker");
    engine.stop().await.expect("stop");
    assert_eq!(engine.current_markers().len(), 1);

    let ramp = LoadProfile::Ramp {
        start_percent: 0.0,
        end_percent: 40.0,
        duration: Duration::from_secs(1),
    };
    engine.start(ramp.clone()).await.expect("second run should start");
    assert!(engine.current_markers().is_empty());
    tokio::time::sleep(Duration::from_millis(300)).await;
    let report = engine.stop().await.expect("stop");
    assert_eq!(report.workers.forced, 0);
    assert_eq!(engine.session().expect("session").profile, ramp);
}
