use std::borrow::Cow;
use crate::drivers::TitrationError;
/// One acquired point of a titration run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub time: f64,
    pub proportion: f64,
    pub conductivity: f64,
    pub motor1_speed: f64,
    pub motor2_speed: f64,
}
impl Sample {
    pub fn new(time: f64, proportion: f64, conductivity: f64) -> Self {
        Self {
            time,
            proportion,
            conductivity,
            motor1_speed: 0.0,
            motor2_speed: 0.0,
        }
    }
    pub fn with_motor_speeds(mut self, motor1: f64, motor2: f64) -> Self {
        self.motor1_speed = motor1;
        self.motor2_speed = motor2;
        self
    }
    pub fn validate(&self) -> Result<(), TitrationError> {
        let fields = [
            ("time", self.time),
            ("proportion", self.proportion),
            ("conductivity", self.conductivity),
            ("motor1_speed", self.motor1_speed),
            ("motor2_speed", self.motor2_speed),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(TitrationError::Validation { field, value });
            }
        }
        Ok(())
    }
}
/// Columnar copy of a contiguous time range of the buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeSlice {
    pub times: Vec<f64>,
    pub proportions: Vec<f64>,
    pub conductivities: Vec<f64>,
}
impl TimeSlice {
    pub fn len(&self) -> usize {
        self.times.len()
    }
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}
/// Append-only store for one titration run.
///
/// Samples are kept as whole records, so a rejected sample never leaves the
/// columns out of step. Readers see the samples in time order; if something
/// arrived out of order the read paths sort a copy, and `sort_by_time`
/// fixes the stored order in place.
#[derive(Clone, Debug, Default)]
pub struct SampleBuffer {
    samples: Vec<Sample>,
    time_sorted: bool,
}
impl SampleBuffer {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            time_sorted: true,
        }
    }
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            time_sorted: true,
        }
    }
    pub fn append(&mut self, sample: Sample) -> Result<(), TitrationError> {
        sample.validate()?;
        if let Some(last) = self.samples.last() {
            if sample.time < last.time {
                self.time_sorted = false;
            }
        }
        self.samples.push(sample);
        Ok(())
    }
    /// Drops everything; used when a new run starts.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.time_sorted = true;
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }
    pub fn is_time_sorted(&self) -> bool {
        self.time_sorted
    }
    /// Stable sort on time, for recordings that arrived out of order.
    pub fn sort_by_time(&mut self) {
        if !self.time_sorted {
            self.samples.sort_by(|a, b| a.time.total_cmp(&b.time));
            self.time_sorted = true;
        }
    }
    pub fn time_series(&self) -> Vec<f64> {
        self.ordered().iter().map(|s| s.time).collect()
    }
    pub fn proportion_series(&self) -> Vec<f64> {
        self.ordered().iter().map(|s| s.proportion).collect()
    }
    pub fn conductivity_series(&self) -> Vec<f64> {
        self.ordered().iter().map(|s| s.conductivity).collect()
    }
    /// Proportion-domain view used for fitting: `(proportion, conductivity)`
    /// pairs whose proportion lies in `[p_min, p_max]`, in time order.
    pub fn slice_by_proportion_range(&self, p_min: f64, p_max: f64) -> (Vec<f64>, Vec<f64>) {
        let (lo, hi) = ordered_bounds(p_min, p_max);
        self.ordered()
            .iter()
            .filter(|s| s.proportion >= lo && s.proportion <= hi)
            .map(|s| (s.proportion, s.conductivity))
            .unzip()
    }
    pub fn slice_by_time_range(&self, t_min: f64, t_max: f64) -> TimeSlice {
        let (lo, hi) = ordered_bounds(t_min, t_max);
        let ordered = self.ordered();
        let start = ordered.partition_point(|s| s.time < lo);
        let end = ordered.partition_point(|s| s.time <= hi);
        let mut slice = TimeSlice::default();
        for s in ordered.get(start..end.max(start)).unwrap_or_default() {
            slice.times.push(s.time);
            slice.proportions.push(s.proportion);
            slice.conductivities.push(s.conductivity);
        }
        slice
    }
    /// Piecewise-linear proportion at time `t`, clamped to the first and last
    /// stored proportions. `None` when the buffer is empty or `t` is not
    /// finite.
    pub fn interpolate_proportion_at(&self, t: f64) -> Option<f64> {
        if !t.is_finite() {
            return None;
        }
        let ordered = self.ordered();
        let first = ordered.first()?;
        let last = ordered.last()?;
        if t <= first.time {
            return Some(first.proportion);
        }
        if t >= last.time {
            return Some(last.proportion);
        }
        let upper = ordered.partition_point(|s| s.time <= t);
        let (a, b) = (&ordered[upper - 1], &ordered[upper]);
        let span = b.time - a.time;
        if span == 0.0 {
            return Some(a.proportion);
        }
        let frac = (t - a.time) / span;
        Some(a.proportion + frac * (b.proportion - a.proportion))
    }
    /// Stored time whose proportion is closest to `p`; places the
    /// intersection marker on a time axis.
    pub fn time_nearest_proportion(&self, p: f64) -> Option<f64> {
        self.ordered()
            .iter()
            .min_by(|a, b| (a.proportion - p).abs().total_cmp(&(b.proportion - p).abs()))
            .map(|s| s.time)
    }
    fn ordered(&self) -> Cow<'_, [Sample]> {
        if self.time_sorted {
            Cow::Borrowed(&self.samples)
        } else {
            let mut sorted = self.samples.clone();
            sorted.sort_by(|a, b| a.time.total_cmp(&b.time));
            Cow::Owned(sorted)
        }
    }
}
fn ordered_bounds(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
