//! 内存任务状态存储
//!
//! Each job lives in a `watch` channel: pollers read the latest value,
//! subscribers are woken on every accepted change.

use std::collections::HashMap;

use async_trait::async_trait;
use diagnosis_domain::{
    DiagnosisError, DiagnosisResult, Job, JobId, JobStatus, JobStatusView, JobStore,
    ProgressUpdate,
};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, watch::Sender<Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Applies `mutate` to the stored job; subscribers are notified only when
    /// it reports a change.
    async fn mutate<F>(&self, job_id: &JobId, mutate: F) -> DiagnosisResult<JobStatusView>
    where
        F: FnOnce(&mut Job) -> DiagnosisResult<bool>,
    {
        let jobs = self.jobs.read().await;
        let sender = jobs
            .get(job_id)
            .ok_or_else(|| DiagnosisError::job_not_found(job_id.as_str()))?;

        let mut outcome = Ok(());
        sender.send_if_modified(|job| match mutate(job) {
            Ok(changed) => changed,
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome?;

        let view = sender.borrow().status_view();
        Ok(view)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> DiagnosisResult<JobStatusView> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.job_id) {
            return Err(DiagnosisError::JobAlreadyExists {
                id: job.job_id.to_string(),
            });
        }
        let view = job.status_view();
        let (sender, _) = watch::channel(job);
        jobs.insert(view.job_id.clone(), sender);
        info!(job_id = %view.job_id, total_cells = view.total_cells, "诊断任务已创建");
        Ok(view)
    }

    async fn get(&self, job_id: &JobId) -> DiagnosisResult<Job> {
        let jobs = self.jobs.read().await;
        let sender = jobs
            .get(job_id)
            .ok_or_else(|| DiagnosisError::job_not_found(job_id.as_str()))?;
        let job = sender.borrow().clone();
        Ok(job)
    }

    async fn status(&self, job_id: &JobId) -> DiagnosisResult<JobStatusView> {
        let jobs = self.jobs.read().await;
        let sender = jobs
            .get(job_id)
            .ok_or_else(|| DiagnosisError::job_not_found(job_id.as_str()))?;
        let view = sender.borrow().status_view();
        Ok(view)
    }

    async fn update_progress(
        &self,
        job_id: &JobId,
        update: ProgressUpdate,
    ) -> DiagnosisResult<JobStatusView> {
        let view = self
            .mutate(job_id, |job| job.apply_progress(&update))
            .await?;
        debug!(
            job_id = %job_id,
            progress = view.progress,
            settled = view.settled_cells,
            version = view.version,
            "任务进度已更新"
        );
        Ok(view)
    }

    async fn transition(&self, job_id: &JobId, next: JobStatus) -> DiagnosisResult<JobStatusView> {
        let view = self
            .mutate(job_id, |job| job.transition(next).map(|_| true))
            .await?;
        info!(job_id = %job_id, status = %view.status, stage = %view.stage, "任务状态变更");
        Ok(view)
    }

    async fn subscribe(&self, job_id: &JobId) -> DiagnosisResult<watch::Receiver<Job>> {
        let jobs = self.jobs.read().await;
        let sender = jobs
            .get(job_id)
            .ok_or_else(|| DiagnosisError::job_not_found(job_id.as_str()))?;
        Ok(sender.subscribe())
    }
}
