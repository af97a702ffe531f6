use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use log::info;
use crate::drivers::plot::{render_analysis_png, PlotStyle};
use crate::drivers::{AnalysisResult, TitrationError};
use crate::recorder::timestamped_filename;
pub const REPORT_PREFIX: &str = "titration_analysis";
pub const DEFAULT_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";
/// Somewhere an analysis result can be written.
pub trait ResultSink {
    /// Writes `result` to `destination` and returns the file actually
    /// written. A failure leaves the result untouched for the caller.
    fn record(
        &mut self,
        result: &AnalysisResult,
        destination: &Path,
    ) -> Result<PathBuf, TitrationError>;
}
/// An existing directory gets a generated, timestamped file name; any other
/// path is taken as the file itself, with `extension` appended when missing.
pub fn resolve_destination(destination: &Path, time_format: &str, extension: &str) -> PathBuf {
    if destination.is_dir() {
        return destination.join(timestamped_filename(REPORT_PREFIX, time_format, extension));
    }
    let wanted = extension.trim_start_matches('.');
    match destination.extension() {
        Some(ext) if ext.eq_ignore_ascii_case(wanted) => destination.to_path_buf(),
        _ => {
            let mut name = destination.as_os_str().to_owned();
            name.push(extension);
            PathBuf::from(name)
        }
    }
}
fn ensure_parent(path: &Path) -> Result<(), TitrationError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
/// Plain-text report: fit parameters followed by the raw series.
#[derive(Clone, Debug)]
pub struct TextReportSink {
    time_format: String,
    extension: String,
}
impl Default for TextReportSink {
    fn default() -> Self {
        Self {
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            extension: ".txt".to_string(),
        }
    }
}
impl TextReportSink {
    pub fn new(time_format: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            time_format: time_format.into(),
            extension: extension.into(),
        }
    }
    pub fn render(result: &AnalysisResult) -> String {
        Report(result).to_string()
    }
}
struct Report<'a>(&'a AnalysisResult);
impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.0;
        let left = &result.fit_left;
        let right = &result.fit_right;
        let (x_star, y_star) = result.intersection;
        writeln!(
            f,
            "Analysis time: {}",
            result.analyzed_at.format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(f, "\n==== Analysis result ====")?;
        writeln!(
            f,
            "Breakpoint (global minimum): {:.6} (index {})",
            result.breakpoint_x, result.breakpoint_index
        )?;
        writeln!(
            f,
            "Left fit: y = {:.4}x + {:.4} (R² = {:.4})",
            left.slope, left.intercept, left.r_squared
        )?;
        writeln!(
            f,
            "Right fit: y = {:.4}x + {:.4} (R² = {:.4})",
            right.slope, right.intercept, right.r_squared
        )?;
        writeln!(f, "Intersection: ({x_star:.6}, {y_star:.6})")?;
        writeln!(f, "Ratio: {:.6}", result.ratio_value)?;
        writeln!(f, "Reagent concentration: {:.6} mol/L", result.reagent_conc)?;
        writeln!(f, "Derived concentration: {:.6} mol/L", result.concentration)?;
        writeln!(f, "Method: {}", result.method_tag)?;
        writeln!(f, "==== Raw data ====")?;
        writeln!(f, "x_fraction\ty_conductance")?;
        for (x, y) in result.x.iter().zip(&result.y) {
            writeln!(f, "{x:.6}\t{y:.6}")?;
        }
        Ok(())
    }
}
impl ResultSink for TextReportSink {
    fn record(
        &mut self,
        result: &AnalysisResult,
        destination: &Path,
    ) -> Result<PathBuf, TitrationError> {
        let path = resolve_destination(destination, &self.time_format, &self.extension);
        ensure_parent(&path)?;
        fs::write(&path, Self::render(result))?;
        info!("analysis report saved: {}", path.display());
        Ok(path)
    }
}
/// PNG snapshot of the analysed curve with both fitted lines.
#[derive(Clone, Debug, Default)]
pub struct PngPlotSink {
    style: PlotStyle,
}
impl PngPlotSink {
    pub fn new(style: PlotStyle) -> Self {
        Self { style }
    }
}
impl ResultSink for PngPlotSink {
    fn record(
        &mut self,
        result: &AnalysisResult,
        destination: &Path,
    ) -> Result<PathBuf, TitrationError> {
        let path = resolve_destination(destination, DEFAULT_TIME_FORMAT, ".png");
        ensure_parent(&path)?;
        let png = render_analysis_png(result, self.style.clone())?;
        fs::write(&path, png)?;
        info!("analysis plot saved: {}", path.display());
        Ok(path)
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::SegmentedFitter;
    fn sample_result() -> AnalysisResult {
        let x: Vec<f64> = (0..=10).map(|i| i as f64 / 10.0).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&xi| if xi <= 0.5 { 100.0 - 100.0 * xi } else { 100.0 * xi })
            .collect();
        SegmentedFitter::default().analyze(&x, &y, 0.1).unwrap()
    }
    #[test]
    fn directory_destination_gets_generated_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_destination(dir.path(), DEFAULT_TIME_FORMAT, ".txt");
        assert_eq!(path.parent(), Some(dir.path()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("titration_analysis_"));
        assert!(name.ends_with(".txt"));
    }
    #[test]
    fn file_destination_gets_extension() {
        let path = resolve_destination(Path::new("out/run1"), DEFAULT_TIME_FORMAT, ".txt");
        assert_eq!(path, PathBuf::from("out/run1.txt"));
        let path = resolve_destination(Path::new("out/run1.txt"), DEFAULT_TIME_FORMAT, ".txt");
        assert_eq!(path, PathBuf::from("out/run1.txt"));
    }
    #[test]
    fn text_report_contains_fit_and_raw_series() {
        let dir = tempfile::tempdir().unwrap();
        let result = sample_result();
        let mut sink = TextReportSink::default();
        let path = sink
            .record(&result, &dir.path().join("processed").join("run"))
            .unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("Analysis time: "));
        assert!(text.contains("Left fit: y = -100.0000x + 100.0000 (R² = 1.0000)"));
        assert!(text.contains("Intersection: (0.500000, 50.000000)"));
        assert!(text.contains("Derived concentration: 0.100000 mol/L"));
        assert!(text.contains("x_fraction\ty_conductance\n0.000000\t100.000000\n"));
        assert_eq!(text.lines().filter(|l| l.contains('\t')).count(), 12);
    }
    #[test]
    fn rendered_report_lists_every_point() {
        let result = sample_result();
        let text = TextReportSink::render(&result);
        assert!(text.starts_with("Analysis time: "));
        assert!(text.ends_with("1.000000\t100.000000\n"));
        let rows = text.lines().skip_while(|l| *l != "x_fraction\ty_conductance").skip(1);
        assert_eq!(rows.count(), result.x.len());
    }
    #[test]
    fn unwritable_destination_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let result = sample_result();
        let err = TextReportSink::default()
            .record(&result, &blocker.join("report"))
            .unwrap_err();
        assert!(matches!(err, TitrationError::Io(_)));
        assert_eq!(result.method_tag, "intersection_based");
    }
}
