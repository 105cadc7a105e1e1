use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use diagnosis_config::AppConfig;
use diagnosis_dispatcher::{DiagnosisService, ExecutionScheduler};
use diagnosis_domain::{Job, JobRequest, JobSnapshot, ResultAggregator};
use diagnosis_infrastructure::{
    CircuitBreakerRegistry, CircuitBreakerSnapshot, InMemoryJobStore, JsonAnswerParser,
    JsonFileReportSink, LoggingReportSink,
};
use diagnosis_worker::{CallExecutor, LatencyHistory, LatencyStats, ProviderClientRegistry};
use tracing::info;

/// 主应用程序: wires configuration into the execution core.
pub struct Application {
    config: AppConfig,
    service: DiagnosisService,
    breakers: Arc<CircuitBreakerRegistry>,
    latency: Arc<LatencyHistory>,
}

impl Application {
    /// 创建新的应用实例。`report_dir` adds a JSON file sink next to the
    /// logging sink.
    pub fn new(config: AppConfig, report_dir: Option<PathBuf>) -> Result<Self> {
        let profiles = config.provider_profiles();
        info!(providers = profiles.len(), "初始化应用程序");

        let clients = ProviderClientRegistry::from_config(&config).context("创建模型提供方客户端失败")?;
        let breakers = Arc::new(CircuitBreakerRegistry::from_profiles(
            config.circuit_breaker.clone(),
            profiles.iter(),
        ));
        let latency = Arc::new(LatencyHistory::new(config.executor.latency_history_capacity));
        let executor = CallExecutor::new(Arc::new(clients), breakers.clone())
            .with_latency_history(latency.clone())
            .with_system_prompt(config.executor.system_prompt.clone());

        let mut scheduler = ExecutionScheduler::new(
            config.scheduler.clone(),
            profiles,
            executor,
            Arc::new(InMemoryJobStore::new()),
            ResultAggregator::new(Arc::new(JsonAnswerParser::new())),
        )
        .with_sink(Arc::new(LoggingReportSink));
        if let Some(dir) = report_dir {
            info!(dir = %dir.display(), "诊断报告将写入目录");
            scheduler = scheduler.with_sink(Arc::new(JsonFileReportSink::new(dir)));
        }

        Ok(Self {
            config,
            service: DiagnosisService::new(Arc::new(scheduler)),
            breakers,
            latency,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn service(&self) -> &DiagnosisService {
        &self.service
    }

    pub fn breaker_snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        self.breakers.snapshots()
    }

    pub fn latency_stats(&self) -> Vec<LatencyStats> {
        self.latency.all_stats()
    }

    /// Submits a job and follows it to the end, calling `on_progress` for
    /// every record change it observes.
    pub async fn run_job<F>(&self, request: JobRequest, mut on_progress: F) -> Result<JobSnapshot>
    where
        F: FnMut(&Job),
    {
        let job_id = self.service.submit(request).await?;
        let mut updates = self.service.subscribe(&job_id).await?;

        loop {
            let job = updates.borrow_and_update().clone();
            on_progress(&job);
            if job.is_terminal() {
                break;
            }
            updates
                .changed()
                .await
                .context("任务状态通道已关闭")?;
        }

        let snapshot = self.service.wait_for(&job_id).await?;
        Ok(snapshot)
    }
}
