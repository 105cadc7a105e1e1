//! Test data builders with sensible defaults.

use std::time::Duration;

use chrono::{DateTime, Utc};
use diagnosis_config::{CircuitBreakerConfig, ProviderProfile};
use diagnosis_domain::{
    Cell, CellError, CellErrorKind, CellId, CellResult, CellState, Job, JobId, JobRequest,
    ParseOutcome,
};

/// Builder for `Job` records.
pub struct JobBuilder {
    id: JobId,
    request: JobRequest,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            id: JobId::from("test-job"),
            request: JobRequest::new(["Acme"], ["deepseek"], ["Which brands lead in {brand}'s market?"]),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = JobId::from(id);
        self
    }

    pub fn with_brands(mut self, brands: &[&str]) -> Self {
        self.request.brands = brands.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.request.models = models.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_questions(mut self, questions: &[&str]) -> Self {
        self.request.questions = questions.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Normalizes the request; panics on invalid test input.
    pub fn build(self) -> Job {
        let request = self
            .request
            .normalized()
            .expect("test job request must be valid");
        Job::new(self.id, request)
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `Cell` records in any state.
pub struct CellBuilder {
    cell: Cell,
}

impl CellBuilder {
    pub fn new(brand: &str, model: &str, question_index: usize) -> Self {
        Self {
            cell: Cell::new(
                JobId::from("test-job"),
                CellId::new(brand, model, question_index),
                "question",
            ),
        }
    }

    pub fn with_job_id(mut self, id: &str) -> Self {
        self.cell.job_id = JobId::from(id);
        self
    }

    pub fn with_question(mut self, question: &str) -> Self {
        self.cell.question = question.to_string();
        self
    }

    pub fn succeeded(mut self, answer: &str) -> Self {
        let model = format!("{}-primary", self.cell.id.model);
        self.cell.settle(CellResult::success(answer.to_string(), model, 1, 100));
        self
    }

    pub fn failed(mut self, kind: CellErrorKind) -> Self {
        let state = match kind {
            CellErrorKind::Timeout | CellErrorKind::GlobalTimeout => CellState::TimedOut,
            _ => CellState::Failed,
        };
        self.cell
            .settle(CellResult::failure(state, CellError::new(kind, "test failure"), 1));
        self
    }

    pub fn with_parse(mut self, outcome: ParseOutcome) -> Self {
        self.cell.parsed_fields = Some(outcome);
        self
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.cell.updated_at = at;
        self
    }

    pub fn build(self) -> Cell {
        self.cell
    }
}

/// Provider profile with a short timeout, suitable for paused-clock tests.
pub fn test_profile(id: &str, models: &[&str]) -> ProviderProfile {
    ProviderProfile::new(id, models.iter().copied()).with_call_timeout(Duration::from_secs(5))
}

/// Breaker config that opens after `failure_threshold` failures and admits a
/// probe after `recovery_secs`.
pub fn breaker_config(failure_threshold: usize, recovery_secs: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        recovery_timeout: Duration::from_secs(recovery_secs),
        max_recovery_timeout: Duration::from_secs(recovery_secs.max(300)),
        ..Default::default()
    }
}
