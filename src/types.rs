// src/types.rs
use std::path::PathBuf;
use crate::drivers::{SelectionEvent, SelectionWindow};
use crate::engine::AnalysisOutcome;
// 数据来源
#[derive(Clone, Debug, PartialEq)]
pub enum SourceKind {
    Simulation { seed: Option<u64> },
    Replay(PathBuf),
    Serial { port: String },
}
// 客户端发给后台的命令
#[derive(Clone, Debug)]
pub enum SessionCommand {
    Connect(SourceKind),
    Disconnect,
    StartTitration,
    PausePlot,
    ResumePlot,
    SetReagentConc(f64),
    SaveRaw(Option<PathBuf>),
    // 进入选区模式, 等待两次点击
    Analyze,
    Click(f64),
    Hover(f64),
    AnalyzeWindow(SelectionWindow),
    Shutdown,
}
// 后台发给客户端的消息
#[derive(Debug)]
pub enum SessionMessage {
    Log(String),
    Status(bool),
    Progress { total: usize, last_time: f64 },
    Selection(SelectionEvent),
    AnalysisDone(Box<AnalysisOutcome>),
    AnalysisFailed(String),
    RawSaved(PathBuf),
    TitrationStopped,
}
