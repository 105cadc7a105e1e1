//! 任务进度跟踪
//!
//! Workers bump shared atomic counters as cells settle; every
//! `batch_size` settlements one of them writes an intermediate update to the
//! job store. The final 100% write is left to the scheduler, which issues it
//! synchronously before the job turns terminal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use diagnosis_domain::{DiagnosisResult, JobId, JobStage, JobStatusView, JobStore, ProgressUpdate};
use tokio::time::Instant;
use tracing::debug;

pub struct ProgressTracker {
    job_id: JobId,
    total: usize,
    batch_size: usize,
    settled: AtomicUsize,
    succeeded: AtomicUsize,
    last_settled_at: Mutex<Instant>,
    store: Arc<dyn JobStore>,
}

impl ProgressTracker {
    pub fn new(job_id: JobId, total: usize, batch_size: usize, store: Arc<dyn JobStore>) -> Self {
        Self {
            job_id,
            total,
            batch_size: batch_size.max(1),
            settled: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            last_settled_at: Mutex::new(Instant::now()),
            store,
        }
    }

    /// Counts one settlement. Returns true when an intermediate progress
    /// write is due; never for the last cell.
    pub fn record(&self, success: bool) -> bool {
        if success {
            self.succeeded.fetch_add(1, Ordering::AcqRel);
        }
        let settled = self.settled.fetch_add(1, Ordering::AcqRel) + 1;
        *self
            .last_settled_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
        settled < self.total && settled % self.batch_size == 0
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn settled(&self) -> usize {
        self.settled.load(Ordering::Acquire)
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.settled() >= self.total
    }

    /// Time since the last settlement, or since the tracker was created.
    pub fn idle_for(&self) -> Duration {
        self.last_settled_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn current(&self) -> ProgressUpdate {
        // read succeeded first so it never exceeds the settled count we report
        let succeeded = self.succeeded();
        ProgressUpdate::from_counts(self.total, self.settled(), succeeded)
    }

    /// Intermediate write. Failures are logged only: a late write against a
    /// job that has already been finalized is expected.
    pub async fn publish(&self) {
        let update = self.current();
        match self.store.update_progress(&self.job_id, update).await {
            Ok(view) => debug!(
                job_id = %self.job_id,
                progress = view.progress,
                settled = view.settled_cells,
                "进度已更新"
            ),
            Err(e) => debug!(job_id = %self.job_id, error = %e, "进度更新被忽略"),
        }
    }

    /// The final, unbatched write: progress 100 and the closing stage.
    pub async fn finish(&self) -> DiagnosisResult<JobStatusView> {
        let succeeded = self.succeeded();
        let stage = if succeeded > 0 {
            JobStage::Completed
        } else {
            JobStage::Failed
        };
        let update =
            ProgressUpdate::from_counts(self.total, self.settled(), succeeded).with_stage(stage);
        self.store.update_progress(&self.job_id, update).await
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("job_id", &self.job_id)
            .field("total", &self.total)
            .field("settled", &self.settled())
            .field("succeeded", &self.succeeded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagnosis_domain::{Job, JobRequest, JobStatus};
    use diagnosis_infrastructure::InMemoryJobStore;

    async fn tracked_job(total_questions: usize, batch_size: usize) -> (Arc<InMemoryJobStore>, ProgressTracker) {
        let questions: Vec<String> = (0..total_questions).map(|i| format!("q{i}")).collect();
        let request = JobRequest::new(["Acme"], ["deepseek"], questions).normalized().unwrap();
        let job = Job::new(JobId::from("job-progress"), request);
        let store = Arc::new(InMemoryJobStore::new());
        store.create(job).await.unwrap();
        store
            .transition(&JobId::from("job-progress"), JobStatus::Fetching)
            .await
            .unwrap();
        let tracker = ProgressTracker::new(
            JobId::from("job-progress"),
            total_questions,
            batch_size,
            store.clone(),
        );
        (store, tracker)
    }

    #[tokio::test]
    async fn test_publish_is_batched_and_skips_last_cell() {
        let (_store, tracker) = tracked_job(5, 2).await;
        let due: Vec<bool> = (0..5).map(|i| tracker.record(i % 2 == 0)).collect();
        assert_eq!(due, vec![false, true, false, true, false]);
        assert_eq!(tracker.settled(), 5);
        assert_eq!(tracker.succeeded(), 3);
        assert!(tracker.is_complete());
    }

    #[tokio::test]
    async fn test_publish_and_finish_write_to_store() {
        let (store, tracker) = tracked_job(3, 1).await;
        let job_id = JobId::from("job-progress");

        assert!(tracker.record(true));
        tracker.publish().await;
        let view = store.status(&job_id).await.unwrap();
        assert_eq!(view.progress, 33);
        assert_eq!(view.settled_cells, 1);
        assert_eq!(view.stage, JobStage::AiFetching);

        tracker.record(false);
        tracker.record(false);
        let view = tracker.finish().await.unwrap();
        assert_eq!(view.progress, 100);
        assert_eq!(view.succeeded_cells, 1);
        assert_eq!(view.stage, JobStage::Completed);
        assert_eq!(view.status, JobStatus::Fetching);
    }

    #[tokio::test]
    async fn test_finish_with_no_success_reports_failed_stage() {
        let (_store, tracker) = tracked_job(1, 5).await;
        tracker.record(false);
        let view = tracker.finish().await.unwrap();
        assert_eq!(view.stage, JobStage::Failed);
        assert_eq!(view.progress, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_resets_on_settlement() {
        let (_store, tracker) = tracked_job(2, 1).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(tracker.idle_for() >= Duration::from_secs(30));
        tracker.record(true);
        assert!(tracker.idle_for() < Duration::from_secs(1));
    }
}
