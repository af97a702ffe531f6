use std::fs;
use std::path::Path;
use std::sync::mpsc::channel;
use titrator::config::AppConfig;
use titrator::drivers::{
    DataSource, ReplaySource, SelectionEvent, SelectionWindow, SimulatedSource, TextReportSink,
    TitrationError,
};
use titrator::engine::{spawn_thread, AcquisitionSession};
use titrator::recorder::RawRecorder;
use titrator::types::{SessionCommand, SessionMessage, SourceKind};
fn config_in(dir: &Path) -> AppConfig {
    AppConfig {
        results_dir: dir.to_path_buf(),
        poll_interval_ms: 1,
        max_samples_per_poll: 256,
        max_speed: 1000,
        save_plot: false,
        ..AppConfig::default()
    }
}
/// Runs a simulated titration to completion and saves it; returns the
/// equivalence fraction the simulation used.
fn record_simulation(config: &AppConfig, path: &Path, noise: f64, seed: u64) -> f64 {
    let source = SimulatedSource::seeded(config.max_speed, config.increment_ms, seed).with_noise(noise);
    let mut session = AcquisitionSession::new(source, config.clone());
    session.start_run().unwrap();
    while !session.pump().unwrap().finished {}
    RawRecorder::save(session.buffer(), path).unwrap();
    session.source().curve().equivalence
}
#[test]
fn replayed_recording_recovers_equivalence_point() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let raw = dir.path().join("run.txt");
    let equivalence = record_simulation(&config, &raw, 0.0, 42);
    let replay = ReplaySource::open(&raw).unwrap();
    assert_eq!(replay.total(), 1000);
    let mut session = AcquisitionSession::new(replay, config.clone());
    session.add_sink(TextReportSink::default());
    session.set_destination(dir.path());
    let events = session.subscribe_selection();
    session.start_run().unwrap();
    while !session.pump().unwrap().finished {}
    assert_eq!(session.buffer().len(), 1000);
    session.request_analysis().unwrap();
    let last_time = session.buffer().last().unwrap().time;
    assert!(session.click(last_time).is_none());
    let outcome = session.click(0.0).unwrap().unwrap();
    let x_star = outcome.result.intersection.0;
    assert!((x_star - equivalence).abs() < 2e-3, "{x_star} vs {equivalence}");
    let expected = config.reagent_conc * x_star / (1.0 - x_star);
    assert!((outcome.result.concentration - expected).abs() < 1e-3);
    assert_eq!(outcome.saved.len(), 1);
    let report = fs::read_to_string(&outcome.saved[0]).unwrap();
    assert!(report.contains("Method: intersection_based"));
    assert!(report.contains("x_fraction\ty_conductance"));
    assert_eq!(
        report.lines().skip_while(|l| !l.starts_with("x_fraction")).count(),
        1001
    );
    let seen: Vec<SelectionEvent> = events.try_iter().collect();
    assert_eq!(seen.first(), Some(&SelectionEvent::Activated));
    assert_eq!(seen.last(), Some(&SelectionEvent::Deactivated));
}
#[test]
fn narrow_window_fails_without_touching_the_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let raw = dir.path().join("run.txt");
    record_simulation(&config, &raw, 0.5, 3);
    let mut session = AcquisitionSession::new(ReplaySource::open(&raw).unwrap(), config);
    while !session.pump().unwrap().finished {}
    // 50 ms per sample: a 0.2 s window holds five samples
    let err = session
        .analyze_window(SelectionWindow::new(1.0, 1.2))
        .unwrap_err();
    assert!(matches!(err, TitrationError::InsufficientData { .. }));
    assert_eq!(session.buffer().len(), 1000);
    assert!(session.source().is_finished());
}
#[test]
fn engine_replays_and_analyses_through_commands() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let raw = dir.path().join("noisy.txt");
    let equivalence = record_simulation(&config, &raw, 0.5, 9);
    let (tx, rx) = channel();
    let (tx_cmd, rx_cmd) = channel();
    let handle = spawn_thread(tx, rx_cmd, config.clone());
    tx_cmd
        .send(SessionCommand::Connect(SourceKind::Replay(raw)))
        .unwrap();
    tx_cmd.send(SessionCommand::SetReagentConc(0.2)).unwrap();
    tx_cmd.send(SessionCommand::StartTitration).unwrap();
    assert!(rx
        .iter()
        .any(|msg| matches!(msg, SessionMessage::TitrationStopped)));
    for cmd in [
        SessionCommand::Analyze,
        SessionCommand::Click(0.0),
        SessionCommand::Click(50.0),
    ] {
        tx_cmd.send(cmd).unwrap();
    }
    let outcome = rx
        .iter()
        .find_map(|msg| match msg {
            SessionMessage::AnalysisDone(outcome) => Some(outcome),
            SessionMessage::AnalysisFailed(reason) => panic!("analysis failed: {reason}"),
            _ => None,
        })
        .unwrap();
    tx_cmd.send(SessionCommand::Shutdown).unwrap();
    handle.join().unwrap();
    assert_eq!(outcome.result.reagent_conc, 0.2);
    assert!((outcome.result.intersection.0 - equivalence).abs() < 0.03);
    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.saved.len(), 1);
    assert!(outcome.saved[0].starts_with(config.processed_dir()));
}
#[test]
fn missing_recording_reports_disconnected() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = channel();
    let (tx_cmd, rx_cmd) = channel();
    let handle = spawn_thread(tx, rx_cmd, config_in(dir.path()));
    tx_cmd
        .send(SessionCommand::Connect(SourceKind::Replay(
            dir.path().join("absent.txt"),
        )))
        .unwrap();
    assert!(rx
        .iter()
        .any(|msg| matches!(msg, SessionMessage::Status(false))));
    drop(tx_cmd);
    handle.join().unwrap();
}
