use thiserror::Error;
#[derive(Debug, Error)]
pub enum TitrationError {
    #[error("invalid sample: {field} is not finite ({value})")]
    Validation { field: &'static str, value: f64 },
    #[error("not enough points for analysis: got {actual}, need at least {required}")]
    InsufficientData { actual: usize, required: usize },
    #[error("fitted segments are parallel (left slope {slope_left}, right slope {slope_right})")]
    ParallelSegments { slope_left: f64, slope_right: f64 },
    #[error("intersection at x = {x} sits on the volume boundary; concentration is undefined")]
    BoundaryIntersection { x: f64 },
    #[error("series length mismatch: x has {x} values, y has {y}")]
    LengthMismatch { x: usize, y: usize },
    #[error("sample buffer is empty; acquire data first")]
    EmptyBuffer,
    #[error("failed to parse `{line}`: {reason}")]
    Parse { line: String, reason: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to render plot: {0}")]
    Plot(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Serial(#[from] serialport::Error),
}
impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for TitrationError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        TitrationError::Plot(format!("{value:?}"))
    }
}
impl From<image::ImageError> for TitrationError {
    fn from(value: image::ImageError) -> Self {
        TitrationError::Plot(value.to_string())
    }
}
impl From<serde_json::Error> for TitrationError {
    fn from(value: serde_json::Error) -> Self {
        TitrationError::Config(value.to_string())
    }
}
