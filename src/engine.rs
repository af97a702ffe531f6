// src/engine.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use log::{debug, info, warn};
use crate::config::AppConfig;
use crate::drivers::{
    open_serial, refit_in_time_domain, AnalysisResult, DataSource, PngPlotSink, RangeSelector,
    ReplaySource, ResultSink, SampleBuffer, SegmentedFitter, SelectionEvent, SelectionWindow,
    SimulatedSource, TextReportSink, TimeDomainFit, TitrationError,
};
use crate::recorder::{timestamped_filename, RawRecorder};
use crate::types::*;
/// Everything produced by one analysis: the fit, its time-axis rendering
/// and what happened when it was handed to the sinks.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub window: SelectionWindow,
    /// Proportions that `window.start` and `window.end` mapped to.
    pub proportion_range: (f64, f64),
    pub result: AnalysisResult,
    pub time_fit: TimeDomainFit,
    /// Where the intersection sits on the time axis.
    pub marker_time: Option<f64>,
    pub saved: Vec<PathBuf>,
    pub failures: Vec<String>,
}
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub appended: usize,
    /// Rejected by validation.
    pub dropped: usize,
    /// Drained while paused.
    pub discarded: usize,
    pub finished: bool,
    /// The raw recording hit a write error and was closed.
    pub recording_failed: bool,
}
/// One titration run: the source being read, the buffer it fills and the
/// analysis machinery that works on that buffer.
pub struct AcquisitionSession<S> {
    source: S,
    buffer: SampleBuffer,
    selector: RangeSelector,
    fitter: SegmentedFitter,
    sinks: Vec<Box<dyn ResultSink + Send>>,
    recorder: RawRecorder,
    destination: PathBuf,
    reagent_conc: f64,
    paused: bool,
    config: AppConfig,
}
impl<S: DataSource> AcquisitionSession<S> {
    pub fn new(source: S, config: AppConfig) -> Self {
        Self {
            source,
            buffer: SampleBuffer::with_capacity(1024),
            selector: RangeSelector::new(),
            fitter: SegmentedFitter::with_precision(config.precision),
            sinks: Vec::new(),
            recorder: RawRecorder::new(),
            destination: config.processed_dir(),
            reagent_conc: config.reagent_conc,
            paused: false,
            config,
        }
    }
    /// Text report, plus a PNG plot when `save_plot` is set.
    pub fn with_default_sinks(mut self) -> Self {
        self.add_sink(TextReportSink::new(
            self.config.filename_time_format.clone(),
            self.config.file_extension.clone(),
        ));
        if self.config.save_plot {
            self.add_sink(PngPlotSink::default());
        }
        self
    }
    pub fn add_sink(&mut self, sink: impl ResultSink + Send + 'static) {
        self.sinks.push(Box::new(sink));
    }
    pub fn set_destination(&mut self, destination: impl Into<PathBuf>) {
        self.destination = destination.into();
    }
    pub fn destination(&self) -> &Path {
        &self.destination
    }
    pub fn set_reagent_conc(&mut self, conc: f64) -> Result<(), TitrationError> {
        if !conc.is_finite() || conc <= 0.0 {
            return Err(TitrationError::Validation {
                field: "reagent_conc",
                value: conc,
            });
        }
        self.reagent_conc = conc;
        Ok(())
    }
    pub fn reagent_conc(&self) -> f64 {
        self.reagent_conc
    }
    pub fn subscribe_selection(&mut self) -> Receiver<SelectionEvent> {
        self.selector.subscribe()
    }
    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }
    pub fn selector(&self) -> &RangeSelector {
        &self.selector
    }
    pub fn source(&self) -> &S {
        &self.source
    }
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
    pub fn is_paused(&self) -> bool {
        self.paused
    }
    pub fn pause(&mut self) {
        self.paused = true;
    }
    pub fn resume(&mut self) {
        self.paused = false;
    }
    /// Discards the previous run and tells the source to start over.
    pub fn start_run(&mut self) -> Result<(), TitrationError> {
        self.buffer.clear();
        if self.selector.is_active() {
            self.selector.deactivate();
        }
        self.paused = false;
        self.source
            .begin_run(self.config.max_speed, self.config.increment_ms)?;
        info!(
            "titration run started (max_speed={}, increment={}ms)",
            self.config.max_speed, self.config.increment_ms
        );
        Ok(())
    }
    /// Streams every accepted sample to `path` until `stop_recording`.
    pub fn start_recording(&mut self, path: impl AsRef<Path>) -> Result<(), TitrationError> {
        self.recorder.start(path)
    }
    pub fn stop_recording(&mut self) -> Result<Option<PathBuf>, TitrationError> {
        self.recorder.stop()
    }
    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }
    /// Drains up to `max_samples_per_poll` samples from the source.
    pub fn pump(&mut self) -> Result<PumpReport, TitrationError> {
        let mut report = PumpReport::default();
        for _ in 0..self.config.max_samples_per_poll {
            let Some(sample) = self.source.poll()? else {
                break;
            };
            if self.paused {
                report.discarded += 1;
                continue;
            }
            match self.buffer.append(sample) {
                Ok(()) => {
                    report.appended += 1;
                    if let Err(e) = self.recorder.write_sample(&sample) {
                        warn!("raw recording stopped: {e}");
                        report.recording_failed = true;
                        if let Err(e) = self.recorder.stop() {
                            debug!("closing failed recording: {e}");
                        }
                    }
                }
                Err(e) => {
                    warn!("dropping sample at t={}: {e}", sample.time);
                    report.dropped += 1;
                }
            }
        }
        report.finished = self.source.is_finished();
        Ok(report)
    }
    /// Puts the selector in two-click mode. Needs data to select from.
    pub fn request_analysis(&mut self) -> Result<(), TitrationError> {
        if self.buffer.is_empty() {
            return Err(TitrationError::EmptyBuffer);
        }
        self.selector.activate();
        Ok(())
    }
    pub fn hover(&mut self, t: f64) -> Option<f64> {
        self.selector.hover(t)
    }
    /// Feeds one click. The second click of a selection runs the analysis
    /// and leaves selection mode.
    pub fn click(&mut self, t: f64) -> Option<Result<AnalysisOutcome, TitrationError>> {
        self.selector.click(t)?;
        let window = self.selector.take_window()?;
        self.selector.deactivate();
        Some(self.analyze_window(window))
    }
    pub fn analyze_window(
        &mut self,
        window: SelectionWindow,
    ) -> Result<AnalysisOutcome, TitrationError> {
        for (field, value) in [("window.start", window.start), ("window.end", window.end)] {
            if !value.is_finite() {
                return Err(TitrationError::Validation { field, value });
            }
        }
        let p_start = self
            .buffer
            .interpolate_proportion_at(window.start)
            .ok_or(TitrationError::EmptyBuffer)?;
        let p_end = self
            .buffer
            .interpolate_proportion_at(window.end)
            .ok_or(TitrationError::EmptyBuffer)?;
        let (x, y) = self.buffer.slice_by_proportion_range(p_start, p_end);
        debug!(
            "window [{:.3}s, {:.3}s] -> proportion [{p_start:.4}, {p_end:.4}], {} points",
            window.start,
            window.end,
            x.len()
        );
        let result = self.fitter.analyze(&x, &y, self.reagent_conc)?;
        let x_star = result.intersection.0;
        let (lo, hi) = (p_start.min(p_end), p_start.max(p_end));
        let mut times = Vec::new();
        let mut props = Vec::new();
        let mut ys = Vec::new();
        for s in self.buffer.samples() {
            if s.proportion >= lo && s.proportion <= hi {
                times.push(s.time);
                props.push(s.proportion);
                ys.push(s.conductivity);
            }
        }
        let time_fit = refit_in_time_domain(&times, &props, &ys, x_star)?;
        let marker_time = self.buffer.time_nearest_proportion(x_star);
        info!("{}", result.summary());
        let mut saved = Vec::new();
        let mut failures = Vec::new();
        for sink in &mut self.sinks {
            match sink.record(&result, &self.destination) {
                Ok(path) => saved.push(path),
                Err(e) => {
                    warn!("failed to save analysis result: {e}");
                    failures.push(e.to_string());
                }
            }
        }
        Ok(AnalysisOutcome {
            window,
            proportion_range: (p_start, p_end),
            result,
            time_fit,
            marker_time,
            saved,
            failures,
        })
    }
}
type BoxedSession = AcquisitionSession<Box<dyn DataSource + Send>>;
fn open_source(
    kind: &SourceKind,
    config: &AppConfig,
) -> Result<Box<dyn DataSource + Send>, TitrationError> {
    let source: Box<dyn DataSource + Send> = match kind {
        SourceKind::Simulation { seed } => {
            let sim = match seed {
                Some(seed) => SimulatedSource::seeded(config.max_speed, config.increment_ms, *seed),
                None => SimulatedSource::new(config.max_speed, config.increment_ms),
            };
            Box::new(sim)
        }
        SourceKind::Replay(path) => Box::new(ReplaySource::open(path)?),
        SourceKind::Serial { port } => {
            Box::new(open_serial(port, config.baud_rate, config.max_speed)?)
        }
    };
    Ok(source)
}
/// Runs the acquisition loop on its own thread. The thread exits on
/// `Shutdown` or when the command channel hangs up.
pub fn spawn_thread(
    tx: Sender<SessionMessage>,
    rx_cmd: Receiver<SessionCommand>,
    config: AppConfig,
) -> JoinHandle<()> {
    thread::spawn(move || {
        tx.send(SessionMessage::Log("Titration engine ready.".to_owned()))
            .ok();
        let mut session: Option<BoxedSession> = None;
        let mut selection_rx: Option<Receiver<SelectionEvent>> = None;
        let mut is_streaming = false;
        let poll_interval = Duration::from_millis(config.poll_interval_ms);
        'outer: loop {
            // 1. 处理客户端命令
            for _ in 0..10 {
                let cmd = match rx_cmd.try_recv() {
                    Ok(cmd) => cmd,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break 'outer,
                };
                match cmd {
                    SessionCommand::Connect(kind) => match open_source(&kind, &config) {
                        Ok(source) => {
                            let processed = config.processed_dir();
                            if let Err(e) = fs::create_dir_all(&processed) {
                                warn!("cannot create {}: {e}", processed.display());
                            }
                            let mut s = AcquisitionSession::new(source, config.clone())
                                .with_default_sinks();
                            selection_rx = Some(s.subscribe_selection());
                            session = Some(s);
                            is_streaming = false;
                            tx.send(SessionMessage::Status(true)).ok();
                            tx.send(SessionMessage::Log(format!("Connected: {kind:?}")))
                                .ok();
                        }
                        Err(e) => {
                            warn!("connect failed: {e}");
                            tx.send(SessionMessage::Log(format!("Connect failed: {e}")))
                                .ok();
                            tx.send(SessionMessage::Status(false)).ok();
                        }
                    },
                    SessionCommand::Disconnect => {
                        session = None;
                        selection_rx = None;
                        is_streaming = false;
                        tx.send(SessionMessage::Status(false)).ok();
                    }
                    SessionCommand::Shutdown => break 'outer,
                    other => {
                        let Some(s) = session.as_mut() else {
                            tx.send(SessionMessage::Log("Not connected.".to_owned()))
                                .ok();
                            continue;
                        };
                        handle_command(s, other, &tx, &config, &mut is_streaming);
                    }
                }
            }
            // 2. 数据流
            if let Some(s) = session.as_mut() {
                if is_streaming {
                    match s.pump() {
                        Ok(report) => {
                            if report.appended > 0 {
                                let last_time = s.buffer().last().map_or(0.0, |l| l.time);
                                tx.send(SessionMessage::Progress {
                                    total: s.buffer().len(),
                                    last_time,
                                })
                                .ok();
                            }
                            if report.finished {
                                is_streaming = false;
                                info!("titration finished with {} samples", s.buffer().len());
                                tx.send(SessionMessage::TitrationStopped).ok();
                            }
                        }
                        Err(e) => {
                            warn!("acquisition error: {e}");
                            is_streaming = false;
                            tx.send(SessionMessage::Log(format!("Acquisition stopped: {e}")))
                                .ok();
                        }
                    }
                }
            }
            // 3. 选区事件转发
            if let Some(rx) = &selection_rx {
                while let Ok(event) = rx.try_recv() {
                    tx.send(SessionMessage::Selection(event)).ok();
                }
            }
            thread::sleep(poll_interval);
        }
        debug!("titration engine stopped");
    })
}
fn handle_command(
    s: &mut BoxedSession,
    cmd: SessionCommand,
    tx: &Sender<SessionMessage>,
    config: &AppConfig,
    is_streaming: &mut bool,
) {
    let log = |text: String| {
        tx.send(SessionMessage::Log(text)).ok();
    };
    match cmd {
        SessionCommand::StartTitration => match s.start_run() {
            Ok(()) => {
                *is_streaming = true;
                log("Titration started.".to_owned());
            }
            Err(e) => log(format!("Failed to start titration: {e}")),
        },
        SessionCommand::PausePlot => {
            s.pause();
            log("Plot paused.".to_owned());
        }
        SessionCommand::ResumePlot => {
            s.resume();
            log("Plot resumed.".to_owned());
        }
        SessionCommand::SetReagentConc(conc) => match s.set_reagent_conc(conc) {
            Ok(()) => log(format!("Reagent concentration set to {conc} mol/L")),
            Err(e) => log(format!("Rejected reagent concentration: {e}")),
        },
        SessionCommand::SaveRaw(path) => {
            let path = path.unwrap_or_else(|| {
                config.raw_dir().join(timestamped_filename(
                    "raw",
                    &config.filename_time_format,
                    &config.file_extension,
                ))
            });
            match RawRecorder::save(s.buffer(), &path) {
                Ok(path) => {
                    tx.send(SessionMessage::RawSaved(path)).ok();
                }
                Err(e) => log(format!("Failed to save raw data: {e}")),
            }
        }
        SessionCommand::Analyze => match s.request_analysis() {
            Ok(()) => log("Click the start and end of the analysis range.".to_owned()),
            Err(e) => {
                tx.send(SessionMessage::AnalysisFailed(e.to_string())).ok();
            }
        },
        SessionCommand::Click(t) => match s.click(t) {
            Some(Ok(outcome)) => {
                tx.send(SessionMessage::AnalysisDone(Box::new(outcome))).ok();
            }
            Some(Err(e)) => {
                tx.send(SessionMessage::AnalysisFailed(e.to_string())).ok();
            }
            None => {}
        },
        SessionCommand::Hover(t) => {
            s.hover(t);
        }
        SessionCommand::AnalyzeWindow(window) => match s.analyze_window(window) {
            Ok(outcome) => {
                tx.send(SessionMessage::AnalysisDone(Box::new(outcome))).ok();
            }
            Err(e) => {
                tx.send(SessionMessage::AnalysisFailed(e.to_string())).ok();
            }
        },
        SessionCommand::Connect(_) | SessionCommand::Disconnect | SessionCommand::Shutdown => {}
    }
}
