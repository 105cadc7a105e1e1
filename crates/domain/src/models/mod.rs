pub mod cell;
pub mod job;
pub mod report;

pub use cell::{Cell, CellError, CellErrorKind, CellResult, CellState, ParseOutcome, ParsedFields};
pub use job::{Job, JobRequest, JobStage, JobStatus, JobStatusView, ProgressUpdate};
pub use report::{
    AggregatedReport, BrandScore, CellSummary, Grade, JobSnapshot, ModelBreakdown, QualityLevel,
    QualityScore,
};
