use std::collections::VecDeque;
use std::f64::consts::PI;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use crate::drivers::{Sample, TitrationError};
use crate::protocol::{parse_line, DeviceLine, HostCommand};
/// Something that yields acquired samples on demand. `poll` never blocks:
/// `Ok(None)` just means nothing new has arrived yet.
pub trait DataSource {
    fn poll(&mut self) -> Result<Option<Sample>, TitrationError>;
    /// True once the run has ended and no further samples will come.
    fn is_finished(&self) -> bool {
        false
    }
    /// Called when a new titration starts.
    fn begin_run(&mut self, _max_speed: u32, _increment_ms: u32) -> Result<(), TitrationError> {
        Ok(())
    }
}
impl<S: DataSource + ?Sized> DataSource for Box<S> {
    fn poll(&mut self) -> Result<Option<Sample>, TitrationError> {
        (**self).poll()
    }
    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }
    fn begin_run(&mut self, max_speed: u32, increment_ms: u32) -> Result<(), TitrationError> {
        (**self).begin_run(max_speed, increment_ms)
    }
}
/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<Sample>,
}
impl ManualSource {
    pub fn new(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self {
            queue: samples.into_iter().collect(),
        }
    }
    pub fn push(&mut self, sample: Sample) {
        self.queue.push_back(sample);
    }
}
impl DataSource for ManualSource {
    fn poll(&mut self) -> Result<Option<Sample>, TitrationError> {
        Ok(self.queue.pop_front())
    }
    fn is_finished(&self) -> bool {
        self.queue.is_empty()
    }
}
/// Plays back a recording written by `RawRecorder`, one row per poll.
///
/// Columns are positional: `time_s, conductivity, motor1_proportion`, then
/// optionally `motor1_speed, motor2_speed`. Rows that do not parse are
/// skipped with a warning.
pub struct ReplaySource {
    rows: Vec<Sample>,
    next: usize,
}
impl ReplaySource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TitrationError> {
        let path = path.as_ref();
        let source = Self::from_reader(File::open(path)?)?;
        info!(
            "loaded replay data from {} ({} rows)",
            path.display(),
            source.total()
        );
        Ok(source)
    }
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TitrationError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut rows = Vec::new();
        for (idx, record) in csv_reader.byte_records().enumerate() {
            let record = record?;
            // header is line 1
            let line = record.position().map_or(idx as u64 + 2, |pos| pos.line());
            match parse_recording_row(&record) {
                Ok(sample) => rows.push(sample),
                Err(e) => warn!("skipping replay row {line}: {e}"),
            }
        }
        Ok(Self { rows, next: 0 })
    }
    pub fn total(&self) -> usize {
        self.rows.len()
    }
    pub fn remaining(&self) -> usize {
        self.rows.len() - self.next
    }
    pub fn rewind(&mut self) {
        self.next = 0;
    }
}
fn parse_recording_row(record: &csv::ByteRecord) -> Result<Sample, TitrationError> {
    let fail = |reason: String| TitrationError::Parse {
        line: record
            .iter()
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join(","),
        reason,
    };
    let field = |idx: usize| -> Result<Option<f64>, TitrationError> {
        let bytes = match record.get(idx) {
            None | Some(b"") => return Ok(None),
            Some(bytes) => bytes,
        };
        let text = std::str::from_utf8(bytes).map_err(|e| fail(format!("column {idx}: {e}")))?;
        text.parse::<f64>()
            .map(Some)
            .map_err(|e| fail(format!("column {idx}: {e}")))
    };
    let required = |idx: usize| -> Result<f64, TitrationError> {
        field(idx)?.ok_or_else(|| fail(format!("missing column {idx}")))
    };
    let time = required(0)?;
    let conductivity = required(1)?;
    let proportion = required(2)?;
    let motor1 = field(3)?.unwrap_or(0.0);
    let motor2 = field(4)?.unwrap_or(0.0);
    Ok(Sample::new(time, proportion, conductivity).with_motor_speeds(motor1, motor2))
}
impl DataSource for ReplaySource {
    fn poll(&mut self) -> Result<Option<Sample>, TitrationError> {
        let sample = self.rows.get(self.next).copied();
        if sample.is_some() {
            self.next += 1;
        }
        Ok(sample)
    }
    fn is_finished(&self) -> bool {
        self.remaining() == 0
    }
    fn begin_run(&mut self, _max_speed: u32, _increment_ms: u32) -> Result<(), TitrationError> {
        self.rewind();
        Ok(())
    }
}
/// Parameters of the synthetic V-shaped curve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulatedCurve {
    pub equivalence: f64,
    pub left_slope: f64,
    pub right_slope: f64,
    pub left_intercept: f64,
    pub right_intercept: f64,
    pub noise_std: f64,
}
impl SimulatedCurve {
    fn random(rng: &mut StdRng, noise_std: f64) -> Self {
        let equivalence = rng.gen_range(0.3..0.7);
        let left_slope = rng.gen_range(-200.0..-50.0);
        let right_slope = rng.gen_range(50.0..200.0);
        let left_intercept = rng.gen_range(150.0..300.0);
        // both lines pass through the equivalence fraction
        let right_intercept = (left_slope - right_slope) * equivalence + left_intercept;
        Self {
            equivalence,
            left_slope,
            right_slope,
            left_intercept,
            right_intercept,
            noise_std,
        }
    }
    pub fn conductivity_at(&self, proportion: f64) -> f64 {
        if proportion <= self.equivalence {
            self.left_slope * proportion + self.left_intercept
        } else {
            self.right_slope * proportion + self.right_intercept
        }
    }
}
/// Simulated titration: motor 1 ramps up, motor 2 ramps down, conductivity
/// follows two noisy lines meeting at a random equivalence fraction.
pub struct SimulatedSource {
    rng: StdRng,
    curve: SimulatedCurve,
    max_speed: u32,
    increment_ms: u32,
    total_points: usize,
    current_point: usize,
    motor1: u32,
    motor2: u32,
}
impl SimulatedSource {
    pub const DEFAULT_TOTAL_POINTS: usize = 10_000;
    pub const DEFAULT_NOISE_STD: f64 = 0.5;
    pub fn new(max_speed: u32, increment_ms: u32) -> Self {
        Self::with_rng(max_speed, increment_ms, StdRng::from_entropy())
    }
    pub fn seeded(max_speed: u32, increment_ms: u32, seed: u64) -> Self {
        Self::with_rng(max_speed, increment_ms, StdRng::seed_from_u64(seed))
    }
    fn with_rng(max_speed: u32, increment_ms: u32, mut rng: StdRng) -> Self {
        let curve = SimulatedCurve::random(&mut rng, Self::DEFAULT_NOISE_STD);
        Self {
            rng,
            curve,
            max_speed,
            increment_ms: increment_ms.max(1),
            total_points: Self::DEFAULT_TOTAL_POINTS,
            current_point: 0,
            motor1: 0,
            motor2: max_speed,
        }
    }
    pub fn with_total_points(mut self, total_points: usize) -> Self {
        self.total_points = total_points;
        self
    }
    pub fn with_noise(mut self, noise_std: f64) -> Self {
        self.curve.noise_std = noise_std.max(0.0);
        self
    }
    pub fn curve(&self) -> SimulatedCurve {
        self.curve
    }
    /// Rewinds the motors and draws a fresh curve.
    pub fn reset(&mut self) {
        let noise_std = self.curve.noise_std;
        self.curve = SimulatedCurve::random(&mut self.rng, noise_std);
        self.current_point = 0;
        self.motor1 = 0;
        self.motor2 = self.max_speed;
    }
    fn gaussian(&mut self) -> f64 {
        // Box-Muller
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }
}
impl DataSource for SimulatedSource {
    fn poll(&mut self) -> Result<Option<Sample>, TitrationError> {
        if self.is_finished() {
            return Ok(None);
        }
        if self.motor1 < self.max_speed {
            self.motor1 += 1;
        }
        if self.motor2 > 0 {
            self.motor2 -= 1;
        }
        self.current_point += 1;
        let proportion = if self.max_speed > 0 {
            self.motor1 as f64 / self.max_speed as f64
        } else {
            0.0
        };
        let noise = self.curve.noise_std * self.gaussian();
        let conductivity = self.curve.conductivity_at(proportion) + noise;
        let time = self.current_point as f64 * self.increment_ms as f64 / 1000.0;
        Ok(Some(
            Sample::new(time, proportion, conductivity)
                .with_motor_speeds(self.motor1 as f64, self.motor2 as f64),
        ))
    }
    fn is_finished(&self) -> bool {
        self.current_point >= self.total_points
            || (self.motor1 >= self.max_speed && self.motor2 == 0)
    }
    fn begin_run(&mut self, max_speed: u32, increment_ms: u32) -> Result<(), TitrationError> {
        self.max_speed = max_speed;
        self.increment_ms = increment_ms.max(1);
        self.reset();
        Ok(())
    }
}
/// Live source over any byte stream speaking the controller's line protocol.
///
/// Bytes are read as they become available and split on newlines; a
/// trailing partial line waits for the next read. Each data frame is stamped
/// with the time elapsed since the source was created.
pub struct LineSource<R> {
    port: R,
    pending: Vec<u8>,
    ready: VecDeque<Sample>,
    max_speed: f64,
    last_motor1: i64,
    last_motor2: i64,
    started: Instant,
    stopped: bool,
}
pub type SerialSource = LineSource<Box<dyn serialport::SerialPort>>;
/// Opens a serial port for non-blocking polling.
pub fn open_serial(
    port_name: &str,
    baud_rate: u32,
    max_speed: u32,
) -> Result<SerialSource, TitrationError> {
    let port = serialport::new(port_name, baud_rate)
        .timeout(Duration::ZERO)
        .open()?;
    info!("opened serial port {port_name} at {baud_rate} baud");
    Ok(LineSource::new(port, max_speed))
}
pub fn available_ports() -> Result<Vec<String>, TitrationError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}
impl<R> LineSource<R> {
    pub fn new(port: R, max_speed: u32) -> Self {
        Self {
            port,
            pending: Vec::new(),
            ready: VecDeque::new(),
            max_speed: max_speed as f64,
            last_motor1: 0,
            last_motor2: 0,
            started: Instant::now(),
            stopped: false,
        }
    }
    /// Restarts the elapsed-time clock, e.g. when a new titration begins.
    pub fn restart_clock(&mut self) {
        self.started = Instant::now();
        self.stopped = false;
    }
    pub fn into_inner(self) -> R {
        self.port
    }
    fn handle_line(&mut self, raw: &str) {
        let Some(line) = parse_line(raw) else {
            return;
        };
        let (motor1, motor2, conductivity) = match line {
            DeviceLine::Data {
                motor1,
                motor2,
                conductivity,
            } => (motor1, motor2, conductivity),
            DeviceLine::ConductivityOnly(conductivity) => {
                (self.last_motor1, self.last_motor2, conductivity)
            }
            DeviceLine::MotorsOnly { motor1, motor2 } => {
                self.last_motor1 = motor1;
                self.last_motor2 = motor2;
                return;
            }
            DeviceLine::Stop => {
                info!("controller reported titration stop");
                self.stopped = true;
                return;
            }
            DeviceLine::Unknown(text) => {
                debug!("controller: {text}");
                return;
            }
        };
        self.last_motor1 = motor1;
        self.last_motor2 = motor2;
        let proportion = if self.max_speed > 0.0 {
            motor1 as f64 / self.max_speed
        } else {
            0.0
        };
        let time = self.started.elapsed().as_secs_f64();
        self.ready.push_back(
            Sample::new(time, proportion, conductivity)
                .with_motor_speeds(motor1 as f64, motor2 as f64),
        );
    }
}
impl<R: Read> LineSource<R> {
    fn fill(&mut self) -> Result<(), TitrationError> {
        let mut chunk = [0u8; 1024];
        let read = match self.port.read(&mut chunk) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                0
            }
            Err(e) => return Err(e.into()),
        };
        if read == 0 {
            return Ok(());
        }
        self.pending.extend_from_slice(&chunk[..read]);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes).into_owned();
            self.handle_line(&line);
        }
        Ok(())
    }
}
impl<R: Write> LineSource<R> {
    pub fn send(&mut self, command: HostCommand) -> Result<(), TitrationError> {
        self.port.write_all(command.encode().as_bytes())?;
        self.port.flush()?;
        info!("sent: {command}");
        Ok(())
    }
}
impl<R: Read + Write> DataSource for LineSource<R> {
    fn poll(&mut self) -> Result<Option<Sample>, TitrationError> {
        if self.ready.is_empty() {
            self.fill()?;
        }
        Ok(self.ready.pop_front())
    }
    fn is_finished(&self) -> bool {
        self.stopped && self.ready.is_empty()
    }
    fn begin_run(&mut self, max_speed: u32, increment_ms: u32) -> Result<(), TitrationError> {
        self.max_speed = max_speed as f64;
        self.ready.clear();
        self.restart_clock();
        self.send(HostCommand::StartTitration {
            max_speed,
            increment_ms,
        })
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    #[test]
    fn manual_source_drains_in_order() {
        let mut source = ManualSource::new(vec![
            Sample::new(0.0, 0.0, 1.0),
            Sample::new(1.0, 0.1, 2.0),
        ]);
        assert_eq!(source.poll().unwrap().unwrap().time, 0.0);
        assert_eq!(source.poll().unwrap().unwrap().time, 1.0);
        assert!(source.poll().unwrap().is_none());
        assert!(source.is_finished());
    }
    #[test]
    fn replay_skips_header_and_bad_rows() {
        let text = "time_s,conductivity,motor1_proportion,motor1_speed,motor2_speed\n\
                    0.0000,210.000000,0.000000,0.0000,100.0000\n\
                    0.0500,oops,0.010000,1.0000,99.0000\n\
                    \n\
                    0.1000,205.500000,0.020000\n";
        let mut source = ReplaySource::from_reader(text.as_bytes()).unwrap();
        assert_eq!(source.total(), 2);
        let first = source.poll().unwrap().unwrap();
        assert_eq!(first.conductivity, 210.0);
        assert_eq!(first.motor2_speed, 100.0);
        let second = source.poll().unwrap().unwrap();
        assert_eq!(second.proportion, 0.02);
        assert_eq!(second.motor1_speed, 0.0);
        assert!(source.is_finished());
        source.begin_run(100, 50).unwrap();
        assert_eq!(source.remaining(), 2);
    }
    #[test]
    fn undecodable_row_is_skipped() {
        let mut bytes = b"time_s,conductivity,motor1_proportion\n0.00,200.0,0.0\n0.05,".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(b",0.1\n0.10,190.0,0.2\n");
        let mut source = ReplaySource::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(source.total(), 2);
        source.poll().unwrap();
        assert_eq!(source.poll().unwrap().unwrap().conductivity, 190.0);
    }
    #[test]
    fn bad_row_is_a_parse_error() {
        let record = csv::ByteRecord::from(vec!["0.5", "x", "0.1"]);
        match parse_recording_row(&record) {
            Err(TitrationError::Parse { line, reason }) => {
                assert_eq!(line, "0.5,x,0.1");
                assert!(reason.starts_with("column 1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    #[test]
    fn simulation_is_v_shaped_and_finishes() {
        let mut source = SimulatedSource::seeded(200, 50, 7).with_noise(0.0);
        let curve = source.curve();
        assert!((0.3..0.7).contains(&curve.equivalence));
        let left = curve.left_slope * curve.equivalence + curve.left_intercept;
        let right = curve.right_slope * curve.equivalence + curve.right_intercept;
        assert!((left - right).abs() < 1e-9);
        let mut samples = Vec::new();
        while let Some(s) = source.poll().unwrap() {
            samples.push(s);
        }
        assert_eq!(samples.len(), 200);
        assert!(source.is_finished());
        let last = samples.last().unwrap();
        assert_eq!(last.proportion, 1.0);
        assert_eq!(last.motor2_speed, 0.0);
        assert!((samples[0].time - 0.05).abs() < 1e-12);
        assert!((samples[9].conductivity - curve.conductivity_at(samples[9].proportion)).abs() < 1e-9);
    }
    #[test]
    fn simulation_respects_point_limit() {
        let mut source = SimulatedSource::seeded(1000, 10, 1).with_total_points(5);
        let mut count = 0;
        while source.poll().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 5);
    }
    #[test]
    fn line_source_frames_partial_lines() {
        let bytes = b"hello\nm1=50, m2=50, c=12.5\nc,13.0\n25,75\nc,14.0\nm1=60, m2=4".to_vec();
        let mut source = LineSource::new(Cursor::new(bytes), 100);
        let first = source.poll().unwrap().unwrap();
        assert_eq!(first.proportion, 0.5);
        assert_eq!(first.conductivity, 12.5);
        let second = source.poll().unwrap().unwrap();
        assert_eq!(second.motor1_speed, 50.0);
        assert_eq!(second.conductivity, 13.0);
        let third = source.poll().unwrap().unwrap();
        assert_eq!(third.proportion, 0.25);
        assert_eq!(third.motor2_speed, 75.0);
        // the unterminated frame stays pending
        assert!(source.poll().unwrap().is_none());
        assert!(!source.is_finished());
    }
    #[test]
    fn line_source_stops_on_controller_signal() {
        let bytes = b"m1=1, m2=9, c=1.0\ntitration stop\n".to_vec();
        let mut source = LineSource::new(Cursor::new(bytes), 10);
        assert!(source.poll().unwrap().is_some());
        assert!(source.is_finished());
    }
    #[test]
    fn line_source_sends_start_command() {
        let mut source = LineSource::new(Cursor::new(Vec::new()), 10);
        source.begin_run(10, 50).unwrap();
        source.send(HostCommand::EmergencyStop).unwrap();
        assert_eq!(source.into_inner().into_inner(), b"t,10,50\ns\n".to_vec());
    }
    #[test]
    fn simulation_restart_draws_new_run() {
        let mut source = SimulatedSource::seeded(10, 50, 3);
        while source.poll().unwrap().is_some() {}
        assert!(source.is_finished());
        source.begin_run(20, 100).unwrap();
        assert!(!source.is_finished());
        let first = source.poll().unwrap().unwrap();
        assert_eq!(first.proportion, 0.05);
        assert!((first.time - 0.1).abs() < 1e-12);
    }
}
