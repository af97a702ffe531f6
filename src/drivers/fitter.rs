use std::fmt;
use chrono::{DateTime, Local};
use log::debug;
use crate::drivers::TitrationError;
/// Smallest analysis window that still leaves three points on each side.
pub const MIN_ANALYSIS_POINTS: usize = 8;
/// Points kept on either side of the breakpoint.
pub const MIN_SEGMENT_POINTS: usize = 3;
pub const DEFAULT_PRECISION: u32 = 4;
/// Beyond this an f64 has no more decimal digits to round to.
pub const MAX_PRECISION: u32 = 15;
pub const METHOD_INTERSECTION: &str = "intersection_based";
const PARALLEL_EPSILON: f64 = 1e-12;
const BOUNDARY_EPSILON: f64 = 1e-12;
/// Ordinary least-squares line with its coefficient of determination.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}
impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
    /// `r_squared` is 0 for a segment with constant `y`.
    pub fn from_points(x: &[f64], y: &[f64]) -> Result<Self, TitrationError> {
        if x.len() != y.len() {
            return Err(TitrationError::LengthMismatch {
                x: x.len(),
                y: y.len(),
            });
        }
        if x.len() < 2 {
            return Err(TitrationError::InsufficientData {
                actual: x.len(),
                required: 2,
            });
        }
        let n = x.len() as f64;
        let mean_x = x.iter().sum::<f64>() / n;
        let mean_y = y.iter().sum::<f64>() / n;
        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (&xi, &yi) in x.iter().zip(y) {
            let dx = xi - mean_x;
            sxx += dx * dx;
            sxy += dx * (yi - mean_y);
        }
        // all x equal: the flat line through the mean is the least-squares answer
        let slope = if sxx == 0.0 { 0.0 } else { sxy / sxx };
        let intercept = mean_y - slope * mean_x;
        let mut ss_res = 0.0;
        let mut ss_tot = 0.0;
        for (&xi, &yi) in x.iter().zip(y) {
            let residual = yi - (slope * xi + intercept);
            ss_res += residual * residual;
            let spread = yi - mean_y;
            ss_tot += spread * spread;
        }
        let r_squared = if ss_tot == 0.0 {
            0.0
        } else {
            (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
        };
        Ok(Self {
            slope,
            intercept,
            r_squared,
        })
    }
    fn rounded(&self, precision: u32) -> Self {
        Self {
            slope: round_to(self.slope, precision),
            intercept: round_to(self.intercept, precision),
            r_squared: round_to(self.r_squared, precision),
        }
    }
}
pub fn fit_linear(x: &[f64], y: &[f64]) -> Result<LinearFit, TitrationError> {
    LinearFit::from_points(x, y)
}
/// Outcome of one two-segment analysis. Numeric fields are rounded for
/// display; `x` and `y` keep the analysed series exactly as given.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisResult {
    pub fit_left: LinearFit,
    pub fit_right: LinearFit,
    pub breakpoint_index: usize,
    pub breakpoint_x: f64,
    pub intersection: (f64, f64),
    pub ratio_value: f64,
    pub reagent_conc: f64,
    pub concentration: f64,
    pub method_tag: String,
    pub analyzed_at: DateTime<Local>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}
impl AnalysisResult {
    /// Short operator-facing report of the fit.
    pub fn summary(&self) -> String {
        let (x_star, _) = self.intersection;
        [
            format!(
                "Analysis complete: intersection x={x_star:.4}, concentration={:.4} mol/L",
                self.concentration
            ),
            format!("Left fit: {}", describe_fit(&self.fit_left, 'x')),
            format!("Right fit: {}", describe_fit(&self.fit_right, 'x')),
            format!("Method: {}", self.method_tag),
        ]
        .join("\n")
    }
}
impl fmt::Display for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
pub fn describe_fit(fit: &LinearFit, var: char) -> String {
    format!(
        "y = {:.3}{var} + {:.3}, R² = {:.4}",
        fit.slope, fit.intercept, fit.r_squared
    )
}
/// Index of the global minimum of `y`, held to `[3, n-4]` so both sides keep
/// at least three points. `y` must already be ordered by x.
pub fn select_breakpoint(y: &[f64]) -> Result<usize, TitrationError> {
    if y.len() < MIN_ANALYSIS_POINTS {
        return Err(TitrationError::InsufficientData {
            actual: y.len(),
            required: MIN_ANALYSIS_POINTS,
        });
    }
    let mut min_idx = 0;
    for (idx, &value) in y.iter().enumerate() {
        if value < y[min_idx] {
            min_idx = idx;
        }
    }
    let upper = y.len() - (MIN_SEGMENT_POINTS + 1);
    Ok(min_idx.clamp(MIN_SEGMENT_POINTS, upper))
}
/// Splits a V-shaped curve at its minimum, fits a line to each side and
/// reads the equivalence point off their intersection.
#[derive(Clone, Copy, Debug)]
pub struct SegmentedFitter {
    precision: u32,
}
impl Default for SegmentedFitter {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
        }
    }
}
impl SegmentedFitter {
    /// `precision` is capped at `MAX_PRECISION`.
    pub fn with_precision(precision: u32) -> Self {
        Self {
            precision: precision.min(MAX_PRECISION),
        }
    }
    pub fn precision(&self) -> u32 {
        self.precision
    }
    pub fn analyze(
        &self,
        x: &[f64],
        y: &[f64],
        reagent_conc: f64,
    ) -> Result<AnalysisResult, TitrationError> {
        if x.len() != y.len() {
            return Err(TitrationError::LengthMismatch {
                x: x.len(),
                y: y.len(),
            });
        }
        if x.len() < MIN_ANALYSIS_POINTS {
            return Err(TitrationError::InsufficientData {
                actual: x.len(),
                required: MIN_ANALYSIS_POINTS,
            });
        }
        for (field, values) in [("x", x), ("y", y)] {
            if let Some(&value) = values.iter().find(|v| !v.is_finite()) {
                return Err(TitrationError::Validation { field, value });
            }
        }
        if !reagent_conc.is_finite() {
            return Err(TitrationError::Validation {
                field: "reagent_conc",
                value: reagent_conc,
            });
        }
        let mut pairs: Vec<(f64, f64)> = x.iter().copied().zip(y.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (xs, ys): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
        let split = select_breakpoint(&ys)?;
        let fit_left = LinearFit::from_points(&xs[..split], &ys[..split])?;
        let fit_right = LinearFit::from_points(&xs[split..], &ys[split..])?;
        debug!(
            "breakpoint at index {split} (x={}), left slope {}, right slope {}",
            xs[split], fit_left.slope, fit_right.slope
        );
        let slope_diff = fit_left.slope - fit_right.slope;
        if slope_diff.abs() < PARALLEL_EPSILON {
            return Err(TitrationError::ParallelSegments {
                slope_left: fit_left.slope,
                slope_right: fit_right.slope,
            });
        }
        let x_star = (fit_right.intercept - fit_left.intercept) / slope_diff;
        let y_star = fit_left.predict(x_star);
        if (x_star - 1.0).abs() < BOUNDARY_EPSILON {
            return Err(TitrationError::BoundaryIntersection { x: x_star });
        }
        // x* : (1 - x*) = target : reagent
        let ratio = x_star / (1.0 - x_star);
        let concentration = reagent_conc * ratio;
        let p = self.precision;
        Ok(AnalysisResult {
            fit_left: fit_left.rounded(p),
            fit_right: fit_right.rounded(p),
            breakpoint_index: split,
            breakpoint_x: round_to(xs[split], p),
            intersection: (round_to(x_star, p), round_to(y_star, p)),
            ratio_value: round_to(ratio, p),
            reagent_conc: round_to(reagent_conc, p),
            concentration: round_to(concentration, p),
            method_tag: METHOD_INTERSECTION.to_string(),
            analyzed_at: Local::now(),
            x: x.to_vec(),
            y: y.to_vec(),
        })
    }
}
/// One side of a time-axis refit, with the time span it covers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentFit {
    pub fit: LinearFit,
    pub time_range: (f64, f64),
}
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimeDomainFit {
    pub left: Option<SegmentFit>,
    pub right: Option<SegmentFit>,
}
/// Refits both sides of the intersection against time instead of proportion,
/// so the lines can be drawn on a time axis. Points at exactly `x_star`
/// belong to both sides; a side with fewer than two points is `None`.
pub fn refit_in_time_domain(
    times: &[f64],
    proportions: &[f64],
    ys: &[f64],
    x_star: f64,
) -> Result<TimeDomainFit, TitrationError> {
    if times.len() != proportions.len() || times.len() != ys.len() {
        return Err(TitrationError::LengthMismatch {
            x: times.len(),
            y: ys.len(),
        });
    }
    let side = |keep: &dyn Fn(f64) -> bool| -> Result<Option<SegmentFit>, TitrationError> {
        let (t, y): (Vec<f64>, Vec<f64>) = times
            .iter()
            .zip(proportions)
            .zip(ys)
            .filter(|((_, p), _)| keep(**p))
            .map(|((&t, _), &y)| (t, y))
            .unzip();
        if t.len() < 2 {
            return Ok(None);
        }
        let fit = LinearFit::from_points(&t, &y)?;
        let lo = t.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = t.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(Some(SegmentFit {
            fit,
            time_range: (lo, hi),
        }))
    };
    Ok(TimeDomainFit {
        left: side(&|p| p <= x_star)?,
        right: side(&|p| p >= x_star)?,
    })
}
pub fn round_to(value: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(precision.min(MAX_PRECISION) as i32);
    (value * scale).round() / scale
}
