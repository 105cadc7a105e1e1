//! Execution scheduler for diagnosis jobs.
//!
//! Builds the brand × model × question grid, fans cells out over a bounded
//! worker pool through the call executor, tracks progress and finalizes the
//! job once every cell has settled or the job deadline has fired.

pub mod grid;
pub mod progress;
pub mod scheduler;
pub mod service;

pub use grid::JobGrid;
pub use progress::ProgressTracker;
pub use scheduler::{ExecutionScheduler, RunOutcome};
pub use service::DiagnosisService;
