//! Submission facade: validate, persist, run in the background, observe.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use diagnosis_domain::{
    DiagnosisError, DiagnosisResult, Job, JobId, JobRequest, JobSnapshot, JobStatus,
    JobStatusView,
};
use tokio::sync::watch;
use tracing::{error, info, info_span, warn, Instrument};

use crate::scheduler::ExecutionScheduler;

type RunResult = Option<Result<Arc<JobSnapshot>, String>>;

#[derive(Clone)]
pub struct DiagnosisService {
    scheduler: Arc<ExecutionScheduler>,
    results: Arc<Mutex<HashMap<JobId, watch::Receiver<RunResult>>>>,
}

impl DiagnosisService {
    pub fn new(scheduler: Arc<ExecutionScheduler>) -> Self {
        Self {
            scheduler,
            results: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn scheduler(&self) -> &Arc<ExecutionScheduler> {
        &self.scheduler
    }

    /// Validates the request, persists the job and starts it in the
    /// background. Once this returns, `get_status` finds the job.
    pub async fn submit(&self, request: JobRequest) -> DiagnosisResult<JobId> {
        let request = self.scheduler.validate(&request)?;
        let job = Job::new(JobId::generate(), request);
        let job_id = job.job_id.clone();
        let grid = self.scheduler.initialize(&job).await?;

        let (tx, rx) = watch::channel::<RunResult>(None);
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.clone(), rx);

        let scheduler = self.scheduler.clone();
        let span = info_span!("diagnosis_job", job_id = %job_id);
        tokio::spawn(
            async move {
                let outcome = match scheduler.run(&job, grid).await {
                    Ok(report) => match scheduler.store().get(&job.job_id).await {
                        Ok(job) => Ok(Arc::new(JobSnapshot { job, report })),
                        Err(e) => Err(e.to_string()),
                    },
                    Err(e) => {
                        error!(error = %e, "诊断任务执行失败");
                        mark_failed(&scheduler, &job.job_id).await;
                        Err(e.to_string())
                    }
                };
                // receivers live in the results map, so this cannot fail
                let _ = tx.send(Some(outcome));
            }
            .instrument(span),
        );

        info!(job_id = %job_id, "诊断任务已提交");
        Ok(job_id)
    }

    pub async fn get_status(&self, job_id: &JobId) -> DiagnosisResult<JobStatusView> {
        self.scheduler.store().status(job_id).await
    }

    pub async fn subscribe(&self, job_id: &JobId) -> DiagnosisResult<watch::Receiver<Job>> {
        self.scheduler.store().subscribe(job_id).await
    }

    /// Number of submitted jobs whose outcome has not been collected yet.
    pub fn uncollected(&self) -> usize {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Waits for a job submitted through this service and returns its final
    /// record and report. The outcome is handed out once; afterwards the job
    /// is only reachable through `get_status`.
    pub async fn wait_for(&self, job_id: &JobId) -> DiagnosisResult<JobSnapshot> {
        let mut rx = self
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
            .ok_or_else(|| DiagnosisError::job_not_found(job_id.to_string()))?;

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| DiagnosisError::internal("诊断任务在完成前中断"))?
            .clone();
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);

        match outcome {
            Some(Ok(snapshot)) => Ok(snapshot.as_ref().clone()),
            Some(Err(message)) => Err(DiagnosisError::internal(message)),
            None => Err(DiagnosisError::internal("诊断任务没有产生结果")),
        }
    }

    /// Submit and wait in one call.
    pub async fn diagnose(&self, request: JobRequest) -> DiagnosisResult<JobSnapshot> {
        let job_id = self.submit(request).await?;
        self.wait_for(&job_id).await
    }
}

async fn mark_failed(scheduler: &ExecutionScheduler, job_id: &JobId) {
    match scheduler.store().get(job_id).await {
        Ok(job) if !job.is_terminal() => {
            if let Err(e) = scheduler.store().transition(job_id, JobStatus::Failed).await {
                warn!(job_id = %job_id, error = %e, "无法将任务标记为失败");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(job_id = %job_id, error = %e, "无法读取任务状态"),
    }
}

impl std::fmt::Debug for DiagnosisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosisService")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
