// src/drivers/mod.rs
// 声明同级目录下的子模块文件
pub mod buffer;
pub mod error;
pub mod fitter;
pub mod plot;
pub mod selector;
pub mod sink;
pub mod source;
// 公开导出这些模块里的结构体，方便外部调用
pub use buffer::{Sample, SampleBuffer, TimeSlice};
pub use error::TitrationError;
pub use fitter::{
    fit_linear, refit_in_time_domain, select_breakpoint, AnalysisResult, LinearFit, SegmentFit,
    SegmentedFitter, TimeDomainFit,
};
pub use plot::{render_analysis_png, PlotStyle};
pub use selector::{RangeSelector, SelectionEvent, SelectionWindow, SelectorState};
pub use sink::{resolve_destination, PngPlotSink, ResultSink, TextReportSink};
pub use source::{
    available_ports, open_serial, DataSource, LineSource, ManualSource, ReplaySource,
    SerialSource, SimulatedSource,
};
