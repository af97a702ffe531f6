use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use chrono::Local;
use log::info;
use crate::drivers::{Sample, SampleBuffer, TitrationError};
pub const RAW_HEADER: &str = "time_s,conductivity,motor1_proportion,motor1_speed,motor2_speed";
/// `<prefix>_<timestamp><ext>`, e.g. `raw_20250101_120000.txt`.
pub fn timestamped_filename(prefix: &str, time_format: &str, extension: &str) -> String {
    format!("{prefix}_{}{extension}", Local::now().format(time_format))
}
/// Writes acquired samples in the flat recording format that
/// `ReplaySource` reads back.
pub struct RawRecorder {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    rows: usize,
}
impl Default for RawRecorder {
    fn default() -> Self {
        Self::new()
    }
}
impl RawRecorder {
    pub fn new() -> Self {
        Self {
            writer: None,
            path: None,
            rows: 0,
        }
    }
    pub fn start(&mut self, path: impl AsRef<Path>) -> Result<(), TitrationError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "{RAW_HEADER}")?;
        self.writer = Some(w);
        self.path = Some(path.to_path_buf());
        self.rows = 0;
        info!("recording started: {}", path.display());
        Ok(())
    }
    pub fn write_sample(&mut self, sample: &Sample) -> Result<(), TitrationError> {
        if let Some(w) = &mut self.writer {
            writeln!(
                w,
                "{:.4},{:.6},{:.6},{:.4},{:.4}",
                sample.time,
                sample.conductivity,
                sample.proportion,
                sample.motor1_speed,
                sample.motor2_speed
            )?;
            self.rows += 1;
        }
        Ok(())
    }
    /// Flushes and closes the file, returning where it went.
    pub fn stop(&mut self) -> Result<Option<PathBuf>, TitrationError> {
        if let Some(mut w) = self.writer.take() {
            w.flush()?;
            info!("recording saved ({} rows)", self.rows);
        }
        Ok(self.path.take())
    }
    pub fn is_recording(&self) -> bool {
        self.writer.is_some()
    }
    /// One-shot dump of a whole buffer, in time order.
    pub fn save(buffer: &SampleBuffer, path: impl AsRef<Path>) -> Result<PathBuf, TitrationError> {
        let mut recorder = Self::new();
        recorder.start(&path)?;
        let mut ordered = buffer.clone();
        ordered.sort_by_time();
        for sample in ordered.samples() {
            recorder.write_sample(sample)?;
        }
        recorder.stop()?;
        Ok(path.as_ref().to_path_buf())
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{DataSource, ReplaySource};
    #[test]
    fn saved_recording_replays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw").join("run.txt");
        let mut buffer = SampleBuffer::new();
        buffer
            .append(Sample::new(0.5, 0.25, 101.125).with_motor_speeds(25.0, 75.0))
            .unwrap();
        buffer
            .append(Sample::new(0.0, 0.0, 120.0).with_motor_speeds(0.0, 100.0))
            .unwrap();
        RawRecorder::save(&buffer, &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(RAW_HEADER));
        assert_eq!(lines.next(), Some("0.0000,120.000000,0.000000,0.0000,100.0000"));
        let mut replay = ReplaySource::open(&path).unwrap();
        assert_eq!(replay.total(), 2);
        replay.poll().unwrap();
        let second = replay.poll().unwrap().unwrap();
        assert_eq!(second.conductivity, 101.125);
        assert_eq!(second.motor1_speed, 25.0);
    }
    #[test]
    fn writes_are_ignored_when_not_recording() {
        let mut recorder = RawRecorder::new();
        recorder.write_sample(&Sample::new(0.0, 0.0, 0.0)).unwrap();
        assert!(!recorder.is_recording());
        assert_eq!(recorder.stop().unwrap(), None);
    }
    #[test]
    fn filename_has_prefix_and_extension() {
        let name = timestamped_filename("raw", "%Y%m%d", ".txt");
        assert!(name.starts_with("raw_"));
        assert!(name.ends_with(".txt"));
        assert_eq!(name.len(), "raw_".len() + 8 + 4);
    }
}
