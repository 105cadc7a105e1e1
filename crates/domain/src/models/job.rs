use chrono::{DateTime, Utc};
use diagnosis_errors::{DiagnosisError, DiagnosisResult};
use serde::{Deserialize, Serialize};

use crate::value_objects::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Initializing,
    Fetching,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Initializing => "initializing",
            JobStatus::Fetching => "fetching",
            JobStatus::Completed => "completed",
            JobStatus::PartiallyCompleted => "partially_completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::PartiallyCompleted | JobStatus::Failed
        )
    }

    /// Both full and partial completion are usable results downstream.
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::PartiallyCompleted)
    }

    /// initializing -> fetching -> {completed | partially_completed | failed}
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Initializing, JobStatus::Fetching) => true,
            (JobStatus::Fetching, next) => next.is_terminal(),
            _ => false,
        }
    }

    /// Terminal status from settled cell counts.
    pub fn from_outcome(total_cells: usize, succeeded_cells: usize) -> Self {
        if succeeded_cells == 0 {
            JobStatus::Failed
        } else if succeeded_cells >= total_cells {
            JobStatus::Completed
        } else {
            JobStatus::PartiallyCompleted
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse phase shown to pollers next to the percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Initializing,
    AiFetching,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStage::Initializing => write!(f, "initializing"),
            JobStage::AiFetching => write!(f, "ai_fetching"),
            JobStage::Completed => write!(f, "completed"),
            JobStage::Failed => write!(f, "failed"),
        }
    }
}

/// Submitted grid dimensions before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub brands: Vec<String>,
    pub models: Vec<String>,
    pub questions: Vec<String>,
}

impl JobRequest {
    pub fn new<B, M, Q>(brands: B, models: M, questions: Q) -> Self
    where
        B: IntoIterator,
        B::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
        Q: IntoIterator,
        Q::Item: Into<String>,
    {
        Self {
            brands: brands.into_iter().map(Into::into).collect(),
            models: models.into_iter().map(Into::into).collect(),
            questions: questions.into_iter().map(Into::into).collect(),
        }
    }

    /// Trims entries, rejects blanks and empty dimensions, and removes
    /// duplicates keeping first-seen order (the main brand stays first).
    pub fn normalized(&self) -> DiagnosisResult<JobRequest> {
        Ok(JobRequest {
            brands: normalize_dimension(&self.brands, "brands")?,
            models: normalize_dimension(&self.models, "models")?,
            questions: normalize_dimension(&self.questions, "questions")?,
        })
    }

    pub fn grid_size(&self) -> usize {
        self.brands.len() * self.models.len() * self.questions.len()
    }
}

fn normalize_dimension(values: &[String], field: &str) -> DiagnosisResult<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DiagnosisError::validation(format!(
                "{field} contains a blank entry"
            )));
        }
        if !normalized.iter().any(|existing| existing == trimmed) {
            normalized.push(trimmed.to_string());
        }
    }
    if normalized.is_empty() {
        return Err(DiagnosisError::validation(format!("{field} must not be empty")));
    }
    Ok(normalized)
}

/// One diagnosis run and its observable status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub brands: Vec<String>,
    pub models: Vec<String>,
    pub questions: Vec<String>,
    pub status: JobStatus,
    pub stage: JobStage,
    pub progress: u8,
    /// Bumped on every accepted mutation
    pub version: u64,
    pub total_cells: usize,
    pub settled_cells: usize,
    pub succeeded_cells: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// `request` is expected to be normalized already.
    pub fn new(job_id: JobId, request: JobRequest) -> Self {
        let now = Utc::now();
        let total_cells = request.grid_size();
        Self {
            job_id,
            brands: request.brands,
            models: request.models,
            questions: request.questions,
            status: JobStatus::Initializing,
            stage: JobStage::Initializing,
            progress: 0,
            version: 0,
            total_cells,
            settled_cells: 0,
            succeeded_cells: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// The grid dimensions this job was created from.
    pub fn request(&self) -> JobRequest {
        JobRequest {
            brands: self.brands.clone(),
            models: self.models.clone(),
            questions: self.questions.clone(),
        }
    }

    pub fn primary_brand(&self) -> Option<&str> {
        self.brands.first().map(String::as_str)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies a progress update; counters never move backwards.
    /// Returns whether anything observable changed.
    pub fn apply_progress(&mut self, update: &ProgressUpdate) -> DiagnosisResult<bool> {
        if self.is_terminal() {
            return Err(DiagnosisError::invalid_transition(self.status, "progress"));
        }

        let mut changed = false;
        let progress = update.progress.min(100);
        if progress > self.progress {
            self.progress = progress;
            changed = true;
        }
        if update.settled_cells > self.settled_cells {
            self.settled_cells = update.settled_cells.min(self.total_cells);
            changed = true;
        }
        if update.succeeded_cells > self.succeeded_cells {
            self.succeeded_cells = update.succeeded_cells.min(self.total_cells);
            changed = true;
        }
        if let Some(stage) = update.stage {
            if stage != self.stage {
                self.stage = stage;
                changed = true;
            }
        }
        if changed {
            self.touch();
        }
        Ok(changed)
    }

    pub fn transition(&mut self, next: JobStatus) -> DiagnosisResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DiagnosisError::invalid_transition(self.status, next));
        }
        self.status = next;
        match next {
            JobStatus::Initializing => {}
            JobStatus::Fetching => self.stage = JobStage::AiFetching,
            JobStatus::Completed | JobStatus::PartiallyCompleted => {
                self.stage = JobStage::Completed;
            }
            JobStatus::Failed => self.stage = JobStage::Failed,
        }
        self.touch();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.job_id.clone(),
            status: self.status,
            stage: self.stage,
            progress: self.progress,
            version: self.version,
            total_cells: self.total_cells,
            settled_cells: self.settled_cells,
            succeeded_cells: self.succeeded_cells,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        }
    }

    fn touch(&mut self) {
        self.version += 1;
        let now = Utc::now();
        // wall clocks can step backwards; updated_at must not
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub progress: u8,
    pub settled_cells: usize,
    pub succeeded_cells: usize,
    pub stage: Option<JobStage>,
}

impl ProgressUpdate {
    /// floor(100 * settled / total)
    pub fn from_counts(total_cells: usize, settled_cells: usize, succeeded_cells: usize) -> Self {
        let progress = if total_cells == 0 {
            100
        } else {
            ((settled_cells.min(total_cells) * 100) / total_cells) as u8
        };
        Self {
            progress,
            settled_cells,
            succeeded_cells,
            stage: None,
        }
    }

    pub fn with_stage(mut self, stage: JobStage) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// What a poller sees for `get_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub stage: JobStage,
    pub progress: u8,
    pub version: u64,
    pub total_cells: usize,
    pub settled_cells: usize,
    pub succeeded_cells: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        let request = JobRequest::new(["Acme", "Globex"], ["deepseek"], ["q1", "q2"])
            .normalized()
            .unwrap();
        Job::new(JobId::from("job-1"), request)
    }

    #[test]
    fn test_request_normalization_dedups_in_order() {
        let request = JobRequest::new(
            [" Acme ", "Globex", "Acme"],
            ["qwen", "deepseek", "qwen"],
            ["q1", "q1", "q2"],
        );
        let normalized = request.normalized().unwrap();
        assert_eq!(normalized.brands, vec!["Acme", "Globex"]);
        assert_eq!(normalized.models, vec!["qwen", "deepseek"]);
        assert_eq!(normalized.questions, vec!["q1", "q2"]);
        assert_eq!(normalized.grid_size(), 8);
    }

    #[test]
    fn test_request_rejects_empty_dimensions() {
        let no_models = JobRequest::new(["Acme"], Vec::<String>::new(), ["q"]);
        let err = no_models.normalized().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("models"));

        let blank_brand = JobRequest::new(["  "], ["m"], ["q"]);
        assert!(blank_brand.normalized().is_err());
    }

    #[test]
    fn test_new_job_starts_initializing() {
        let job = sample_job();
        assert_eq!(job.status, JobStatus::Initializing);
        assert_eq!(job.stage, JobStage::Initializing);
        assert_eq!(job.progress, 0);
        assert_eq!(job.total_cells, 4);
        assert_eq!(job.primary_brand(), Some("Acme"));
    }

    #[test]
    fn test_status_transitions_follow_lifecycle() {
        use JobStatus::*;
        let all = [Initializing, Fetching, Completed, PartiallyCompleted, Failed];
        for from in all {
            for to in all {
                let expected = matches!(
                    (from, to),
                    (Initializing, Fetching)
                        | (Fetching, Completed)
                        | (Fetching, PartiallyCompleted)
                        | (Fetching, Failed)
                );
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_transition_sets_stage_and_completion_time() {
        let mut job = sample_job();
        assert!(job.transition(JobStatus::Completed).is_err());

        job.transition(JobStatus::Fetching).unwrap();
        assert_eq!(job.stage, JobStage::AiFetching);
        assert!(job.completed_at.is_none());

        job.transition(JobStatus::PartiallyCompleted).unwrap();
        assert_eq!(job.stage, JobStage::Completed);
        assert!(job.completed_at.is_some());
        assert!(job.transition(JobStatus::Failed).is_err());
    }

    #[test]
    fn test_progress_never_regresses() {
        let mut job = sample_job();
        job.transition(JobStatus::Fetching).unwrap();

        assert!(job
            .apply_progress(&ProgressUpdate::from_counts(4, 2, 1))
            .unwrap());
        assert_eq!(job.progress, 50);
        let version = job.version;

        // a stale batch arriving late is ignored
        assert!(!job
            .apply_progress(&ProgressUpdate::from_counts(4, 1, 1))
            .unwrap());
        assert_eq!(job.progress, 50);
        assert_eq!(job.settled_cells, 2);
        assert_eq!(job.version, version);
    }

    #[test]
    fn test_terminal_job_rejects_progress() {
        let mut job = sample_job();
        job.transition(JobStatus::Fetching).unwrap();
        job.transition(JobStatus::Failed).unwrap();
        assert!(job
            .apply_progress(&ProgressUpdate::from_counts(4, 4, 0))
            .is_err());
    }

    #[test]
    fn test_progress_is_floored() {
        assert_eq!(ProgressUpdate::from_counts(3, 1, 0).progress, 33);
        assert_eq!(ProgressUpdate::from_counts(3, 2, 0).progress, 66);
        assert_eq!(ProgressUpdate::from_counts(3, 3, 0).progress, 100);
        assert_eq!(ProgressUpdate::from_counts(7, 9, 0).progress, 100);
    }

    #[test]
    fn test_status_from_outcome() {
        assert_eq!(JobStatus::from_outcome(4, 4), JobStatus::Completed);
        assert_eq!(JobStatus::from_outcome(4, 1), JobStatus::PartiallyCompleted);
        assert_eq!(JobStatus::from_outcome(4, 0), JobStatus::Failed);
        assert!(JobStatus::PartiallyCompleted.is_terminal_success());
        assert!(!JobStatus::Failed.is_terminal_success());
    }
}
