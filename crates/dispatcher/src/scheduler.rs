//! # 执行调度器
//!
//! Owns one job's lifecycle: `initializing → fetching → terminal`. Cells are
//! pulled from a shared queue by a bounded pool of worker tasks, each running
//! the call executor; the job deadline and the stall watchdog race the pool
//! and force-settle whatever is still open when they fire.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use diagnosis_config::{BreakerScope, ProviderProfile, SchedulerConfig};
use diagnosis_domain::{
    AggregatedReport, Cell, CellError, CellErrorKind, CellResult, CellState, DiagnosisError,
    DiagnosisResult, Job, JobId, JobRequest, JobSnapshot, JobStatus, JobStore, ReportSink,
    ResultAggregator,
};
use diagnosis_infrastructure::MetricsCollector;
use diagnosis_worker::CallExecutor;
use futures::future::join_all;
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::grid::JobGrid;
use crate::progress::ProgressTracker;

/// How the worker pool phase of a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every cell settled through the executor
    Settled,
    /// The job-level deadline fired
    JobTimeout,
    /// No cell settled within the stall window
    Stalled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Settled => "settled",
            RunOutcome::JobTimeout => "job_timeout",
            RunOutcome::Stalled => "stalled",
        }
    }
}

pub struct ExecutionScheduler {
    config: SchedulerConfig,
    profiles: Arc<HashMap<String, ProviderProfile>>,
    executor: CallExecutor,
    store: Arc<dyn JobStore>,
    aggregator: ResultAggregator,
    sinks: Vec<Arc<dyn ReportSink>>,
    metrics: MetricsCollector,
}

impl ExecutionScheduler {
    pub fn new<I>(
        config: SchedulerConfig,
        profiles: I,
        executor: CallExecutor,
        store: Arc<dyn JobStore>,
        aggregator: ResultAggregator,
    ) -> Self
    where
        I: IntoIterator<Item = ProviderProfile>,
    {
        let profiles = profiles
            .into_iter()
            .map(|profile| (profile.id.clone(), profile))
            .collect();
        Self {
            config,
            profiles: Arc::new(profiles),
            executor,
            store,
            aggregator,
            sinks: Vec::new(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn executor(&self) -> &CallExecutor {
        &self.executor
    }

    pub fn profile(&self, provider_id: &str) -> Option<&ProviderProfile> {
        self.profiles.get(provider_id)
    }

    /// Normalizes a submission and checks it against the configured
    /// providers and the grid ceiling. Nothing is created on failure.
    pub fn validate(&self, request: &JobRequest) -> DiagnosisResult<JobRequest> {
        let request = request.normalized()?;
        let cells = request.grid_size();
        if cells > self.config.max_cells {
            return Err(DiagnosisError::validation(format!(
                "任务规模过大: {cells} 个单元，上限为 {}",
                self.config.max_cells
            )));
        }
        for provider in &request.models {
            self.usable_profile(provider)?;
        }
        Ok(request)
    }

    fn usable_profile(&self, provider_id: &str) -> DiagnosisResult<&ProviderProfile> {
        let profile = self
            .profiles
            .get(provider_id)
            .ok_or_else(|| DiagnosisError::UnknownProvider(provider_id.to_string()))?;
        if profile.models.is_empty() {
            return Err(DiagnosisError::validation(format!(
                "模型提供方 {provider_id} 没有配置任何可用模型"
            )));
        }
        if !self.executor.clients().contains(provider_id) {
            return Err(DiagnosisError::validation(format!(
                "模型提供方 {provider_id} 没有可用的客户端，请检查 base_url 配置"
            )));
        }
        Ok(profile)
    }

    /// Checks the job's dimensions like a submission, persists the
    /// zero-progress record if the store does not have it yet, builds the
    /// grid and moves the job to `fetching`. A job whose dimensions are not
    /// already normalized is rejected before anything is stored.
    #[instrument(skip_all, fields(job_id = %job.job_id))]
    pub async fn initialize(&self, job: &Job) -> DiagnosisResult<JobGrid> {
        let request = job.request();
        if self.validate(&request)? != request {
            return Err(DiagnosisError::validation(
                "任务维度包含重复或未规范化的条目，请先规范化后再创建任务",
            ));
        }

        let grid = JobGrid::build(job);
        if grid.is_empty() {
            return Err(DiagnosisError::validation("任务没有任何可执行的单元"));
        }

        match self.store.create(job.clone()).await {
            Ok(_) | Err(DiagnosisError::JobAlreadyExists { .. }) => {}
            Err(e) => return Err(e),
        }

        self.store.transition(&job.job_id, JobStatus::Fetching).await?;
        info!(
            cells = grid.len(),
            brands = job.brands.len(),
            models = job.models.len(),
            questions = job.questions.len(),
            "任务网格已创建"
        );
        Ok(grid)
    }

    /// Runs every cell and finalizes the job. Cell failures never fail the
    /// run; only store errors do.
    #[instrument(skip_all, fields(job_id = %job.job_id, cells = grid.len()))]
    pub async fn run(&self, job: &Job, grid: JobGrid) -> DiagnosisResult<AggregatedReport> {
        let started = Instant::now();
        let total = grid.len();
        let executor = match self.config.breaker_scope {
            BreakerScope::Process => self.executor.clone(),
            BreakerScope::Job => self
                .executor
                .with_breakers(Arc::new(self.executor.breakers().fresh())),
        };

        let slots: Arc<Vec<Mutex<Cell>>> =
            Arc::new(grid.into_cells().into_iter().map(Mutex::new).collect());
        let queue = Arc::new(Mutex::new((0..total).collect::<VecDeque<usize>>()));
        let tracker = Arc::new(ProgressTracker::new(
            job.job_id.clone(),
            total,
            self.config.progress_batch_size,
            self.store.clone(),
        ));
        let cancelled = Arc::new(AtomicBool::new(false));

        let pool_size = self.config.concurrency.min(total);
        info!(pool_size, "开始执行任务");
        let handles: Vec<_> = (0..pool_size)
            .map(|worker_id| {
                let worker = CellWorker {
                    executor: executor.clone(),
                    profiles: self.profiles.clone(),
                    slots: slots.clone(),
                    queue: queue.clone(),
                    tracker: tracker.clone(),
                    cancelled: cancelled.clone(),
                    metrics: self.metrics,
                };
                tokio::spawn(worker.run(worker_id))
            })
            .collect();

        let outcome = tokio::select! {
            biased;
            results = join_all(handles) => {
                let crashed = results.iter().filter(|r| r.is_err()).count();
                if crashed > 0 {
                    error!(crashed, "部分工作协程异常退出");
                }
                RunOutcome::Settled
            }
            _ = sleep(self.config.job_timeout) => RunOutcome::JobTimeout,
            _ = stall_watchdog(
                &tracker,
                self.config.stall_timeout,
                self.config.watchdog_interval,
            ) => RunOutcome::Stalled,
        };

        // workers stop pulling new cells; in-flight calls finish in the background
        cancelled.store(true, Ordering::Release);
        if outcome != RunOutcome::Settled {
            warn!(
                outcome = outcome.as_str(),
                settled = tracker.settled(),
                total,
                "任务未能在时限内完成，强制结束剩余单元"
            );
        }
        let forced = self.force_settle(&slots, &tracker, outcome);
        if forced > 0 {
            self.metrics.record_forced_timeouts(forced);
        }

        let cells: Vec<Cell> = slots.iter().map(|slot| lock(slot).clone()).collect();
        self.finalize(&job.job_id, &cells, &tracker, started.elapsed())
            .await
    }

    fn force_settle(&self, slots: &[Mutex<Cell>], tracker: &ProgressTracker, outcome: RunOutcome) -> usize {
        let message = match outcome {
            RunOutcome::JobTimeout => format!(
                "任务超过整体时限 {}s，单元被强制结束",
                self.config.job_timeout.as_secs()
            ),
            RunOutcome::Stalled => format!(
                "任务连续 {}s 没有进展，单元被强制结束",
                self.config.stall_timeout.as_secs()
            ),
            RunOutcome::Settled => "执行单元的工作协程异常退出".to_string(),
        };

        let mut forced = 0;
        for slot in slots {
            let mut cell = lock(slot);
            if cell.force_timeout(message.clone()) {
                forced += 1;
                tracker.record(false);
                self.metrics
                    .record_cell_settled(&cell.id.model, &CellState::TimedOut.to_string());
            }
        }
        forced
    }

    async fn finalize(
        &self,
        job_id: &JobId,
        cells: &[Cell],
        tracker: &ProgressTracker,
        elapsed: Duration,
    ) -> DiagnosisResult<AggregatedReport> {
        // the 100% write happens-after every settlement and before the terminal status
        tracker.finish().await?;

        let job = self.store.get(job_id).await?;
        let report = self.aggregator.aggregate(&job, cells);
        // the slot snapshot is the record of truth for the terminal status
        let succeeded = cells.iter().filter(|cell| cell.state == CellState::Success).count();
        let status = JobStatus::from_outcome(cells.len(), succeeded);
        self.store.transition(job_id, status).await?;
        self.metrics.record_job_finished(status.as_str(), elapsed);

        info!(
            status = %status,
            succeeded,
            total = cells.len(),
            warnings = report.warnings.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "任务执行完成"
        );

        let snapshot = JobSnapshot {
            job: self.store.get(job_id).await?,
            report: report.clone(),
        };
        self.deliver(&snapshot).await;
        Ok(report)
    }

    async fn deliver(&self, snapshot: &JobSnapshot) {
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(snapshot).await {
                error!(job_id = %snapshot.job.job_id, error = %e, "诊断报告投递失败");
            }
        }
    }
}

impl std::fmt::Debug for ExecutionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionScheduler")
            .field("config", &self.config)
            .field("providers", &self.profiles.keys().collect::<Vec<_>>())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// One member of the per-job worker pool.
struct CellWorker {
    executor: CallExecutor,
    profiles: Arc<HashMap<String, ProviderProfile>>,
    slots: Arc<Vec<Mutex<Cell>>>,
    queue: Arc<Mutex<VecDeque<usize>>>,
    tracker: Arc<ProgressTracker>,
    cancelled: Arc<AtomicBool>,
    metrics: MetricsCollector,
}

impl CellWorker {
    async fn run(self, worker_id: usize) {
        while !self.cancelled.load(Ordering::Acquire) {
            let Some(index) = lock(&self.queue).pop_front() else {
                break;
            };
            let Some(cell) = self.claim(index) else {
                continue;
            };

            let result = match self.profiles.get(&cell.id.model) {
                Some(profile) => self.executor.execute(&cell, profile).await,
                None => CellResult::failure(
                    CellState::Failed,
                    CellError::new(
                        CellErrorKind::Unknown,
                        format!("未配置的模型提供方: {}", cell.id.model),
                    ),
                    1,
                ),
            };
            self.settle(index, &cell, result).await;
        }
        debug!(worker_id, "工作协程退出");
    }

    /// Marks the cell in flight and hands out a copy; the slot stays the
    /// record of truth.
    fn claim(&self, index: usize) -> Option<Cell> {
        let mut cell = lock(&self.slots[index]);
        cell.mark_in_flight().then(|| cell.clone())
    }

    async fn settle(&self, index: usize, cell: &Cell, result: CellResult) {
        let success = result.is_success();
        let state = result.state;
        // counted under the slot lock so force_settle never sees a settled
        // cell whose settlement is missing from the tracker
        let publish_due = {
            let mut slot = lock(&self.slots[index]);
            if !slot.settle(result) {
                debug!(cell_id = %cell.id, "单元已被强制结束，丢弃迟到的结果");
                return;
            }
            self.tracker.record(success)
        };

        self.metrics
            .record_cell_settled(&cell.id.model, &state.to_string());
        if publish_due {
            self.tracker.publish().await;
        }
    }
}

async fn stall_watchdog(tracker: &ProgressTracker, stall_timeout: Duration, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if tracker.idle_for() >= stall_timeout {
            return;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // every critical section leaves the protected value consistent
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
