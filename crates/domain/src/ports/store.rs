use async_trait::async_trait;
use diagnosis_errors::DiagnosisResult;
use tokio::sync::watch;

use crate::models::{Job, JobStatus, JobStatusView, ProgressUpdate};
use crate::value_objects::JobId;

/// 任务状态存储抽象
///
/// Every accepted mutation bumps the job's version. Progress regressions are
/// ignored and illegal status transitions are rejected by the store itself.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: Job) -> DiagnosisResult<JobStatusView>;
    async fn get(&self, job_id: &JobId) -> DiagnosisResult<Job>;
    async fn status(&self, job_id: &JobId) -> DiagnosisResult<JobStatusView>;
    async fn update_progress(
        &self,
        job_id: &JobId,
        update: ProgressUpdate,
    ) -> DiagnosisResult<JobStatusView>;
    async fn transition(&self, job_id: &JobId, next: JobStatus) -> DiagnosisResult<JobStatusView>;
    /// Push channel: the receiver always holds the latest record.
    async fn subscribe(&self, job_id: &JobId) -> DiagnosisResult<watch::Receiver<Job>>;
}
