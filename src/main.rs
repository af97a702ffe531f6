// src/main.rs
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use titrator::config::AppConfig;
use titrator::drivers::{available_ports, open_serial, SimulatedSource};
use titrator::engine::{spawn_thread, AcquisitionSession};
use titrator::protocol::HostCommand;
use titrator::recorder::{timestamped_filename, RawRecorder};
use titrator::types::{SessionCommand, SessionMessage, SourceKind};
/// Conductometric titration acquisition and equivalence-point analysis
#[derive(Parser)]
#[command(name = "titrator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}
#[derive(Subcommand)]
enum Commands {
    /// Record a simulated titration run
    Simulate {
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = SimulatedSource::DEFAULT_TOTAL_POINTS)]
        points: usize,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Replay a recording and analyse the time window [from, to]
    Analyze {
        #[arg(long, value_name = "FILE")]
        replay: PathBuf,
        #[arg(long)]
        from: f64,
        #[arg(long)]
        to: f64,
        /// Titrant concentration in mol/L
        #[arg(long)]
        reagent: Option<f64>,
        /// Results directory (overrides the config)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Skip the PNG plot
        #[arg(long)]
        no_png: bool,
    },
    /// Live acquisition from the titration controller
    Acquire {
        #[arg(short, long)]
        port: String,
        /// Stop after this many seconds even if the controller keeps going
        #[arg(long, default_value_t = 600)]
        seconds: u64,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// List serial ports
    Ports,
}
fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = AppConfig::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    match cli.command {
        Commands::Simulate { out, points, seed } => run_simulate(config, out, points, seed),
        Commands::Analyze {
            replay,
            from,
            to,
            reagent,
            out,
            no_png,
        } => run_analyze(config, replay, from, to, reagent, out, no_png),
        Commands::Acquire { port, seconds, out } => run_acquire(config, &port, seconds, out),
        Commands::Ports => {
            let ports = available_ports().context("failed to enumerate serial ports")?;
            if ports.is_empty() {
                println!("No serial ports found.");
            }
            for port in ports {
                println!("{port}");
            }
            Ok(())
        }
    }
}
fn raw_path(config: &AppConfig, out: Option<PathBuf>) -> PathBuf {
    out.unwrap_or_else(|| {
        config.raw_dir().join(timestamped_filename(
            "raw",
            &config.filename_time_format,
            &config.file_extension,
        ))
    })
}
fn run_simulate(
    config: AppConfig,
    out: Option<PathBuf>,
    points: usize,
    seed: Option<u64>,
) -> Result<()> {
    let source = match seed {
        Some(seed) => SimulatedSource::seeded(config.max_speed, config.increment_ms, seed),
        None => SimulatedSource::new(config.max_speed, config.increment_ms),
    }
    .with_total_points(points);
    let path = raw_path(&config, out);
    let mut session = AcquisitionSession::new(source, config);
    session.start_run()?;
    loop {
        let report = session.pump()?;
        if report.finished {
            break;
        }
    }
    let equivalence = session.source().curve().equivalence;
    RawRecorder::save(session.buffer(), &path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!(
        "Simulated {} samples (equivalence fraction {equivalence:.4}) -> {}",
        session.buffer().len(),
        path.display()
    );
    Ok(())
}
/// Waits for the first message `pick` accepts, echoing log lines meanwhile.
fn wait_for<T>(
    rx: &Receiver<SessionMessage>,
    mut pick: impl FnMut(SessionMessage) -> Option<Result<T>>,
) -> Result<T> {
    for msg in rx.iter() {
        let msg = match msg {
            SessionMessage::Log(text) => {
                info!("{text}");
                continue;
            }
            other => other,
        };
        if let Some(done) = pick(msg) {
            return done;
        }
    }
    bail!("engine stopped unexpectedly")
}
fn run_analyze(
    mut config: AppConfig,
    replay: PathBuf,
    from: f64,
    to: f64,
    reagent: Option<f64>,
    out: Option<PathBuf>,
    no_png: bool,
) -> Result<()> {
    if let Some(out) = out {
        config.results_dir = out;
    }
    if no_png {
        config.save_plot = false;
    }
    config.validate()?;
    let (tx, rx) = mpsc::channel();
    let (tx_cmd, rx_cmd) = mpsc::channel();
    let handle = spawn_thread(tx, rx_cmd, config);
    let commands = [
        SessionCommand::Connect(SourceKind::Replay(replay)),
        SessionCommand::StartTitration,
    ];
    for cmd in commands {
        tx_cmd.send(cmd).context("engine is not running")?;
    }
    if let Some(conc) = reagent {
        tx_cmd.send(SessionCommand::SetReagentConc(conc))?;
    }
    wait_for(&rx, |msg| match msg {
        SessionMessage::TitrationStopped => Some(Ok(())),
        SessionMessage::Status(false) => Some(Err(anyhow::anyhow!("replay source closed"))),
        _ => None,
    })?;
    for cmd in [
        SessionCommand::Analyze,
        SessionCommand::Click(from),
        SessionCommand::Click(to),
    ] {
        tx_cmd.send(cmd)?;
    }
    let outcome = wait_for(&rx, |msg| match msg {
        SessionMessage::AnalysisDone(outcome) => Some(Ok(outcome)),
        SessionMessage::AnalysisFailed(reason) => {
            Some(Err(anyhow::anyhow!("analysis failed: {reason}")))
        }
        _ => None,
    });
    tx_cmd.send(SessionCommand::Shutdown).ok();
    handle.join().ok();
    let outcome = outcome?;
    println!("{}", outcome.result.summary());
    for path in &outcome.saved {
        println!("Saved {}", path.display());
    }
    for failure in &outcome.failures {
        warn!("not saved: {failure}");
    }
    Ok(())
}
fn run_acquire(config: AppConfig, port: &str, seconds: u64, out: Option<PathBuf>) -> Result<()> {
    let source = open_serial(port, config.baud_rate, config.max_speed)
        .with_context(|| format!("failed to open serial port {port}"))?;
    let path = raw_path(&config, out);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let mut session = AcquisitionSession::new(source, config);
    session.start_recording(&path)?;
    session.start_run()?;
    let deadline = Instant::now() + Duration::from_secs(seconds);
    loop {
        let report = session.pump()?;
        if report.recording_failed {
            warn!("raw recording to {} was closed after a write error", path.display());
        }
        if report.finished {
            break;
        }
        if Instant::now() >= deadline {
            warn!("time limit reached, stopping the controller");
            session.source_mut().send(HostCommand::EmergencyStop)?;
            break;
        }
        thread::sleep(poll_interval);
    }
    let saved = session.stop_recording()?;
    println!("Acquired {} samples", session.buffer().len());
    if let Some(saved) = saved {
        println!("Raw data saved to {}", saved.display());
    }
    Ok(())
}
