//! Logging and metrics setup plus the metric names the execution core emits.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use diagnosis_config::{LogLevel, ObservabilityConfig, OutputFormat};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize structured logging. `RUST_LOG` overrides the configured level.
pub fn init_logging(level: LogLevel, format: OutputFormat) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        OutputFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true);
            registry
                .with(fmt_layer)
                .try_init()
                .context("初始化日志系统失败")?;
        }
        OutputFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(false)
                .with_writer(std::io::stderr);
            registry
                .with(fmt_layer)
                .try_init()
                .context("初始化日志系统失败")?;
        }
    }

    info!(logging.format = %format, logging.level = %level, "日志系统已初始化");
    Ok(())
}

/// Install the Prometheus exporter on `bind_address`. Must run inside a tokio runtime.
pub fn init_metrics(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind_address}"))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("安装Prometheus导出器失败: {e}"))?;

    info!(address = %addr, "Prometheus指标导出器已启动");
    Ok(())
}

pub fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    init_logging(config.log_level, config.log_format)?;
    if config.metrics_enabled {
        init_metrics(&config.metrics_bind_address)?;
    }
    Ok(())
}

/// Metric recording for the execution core. Stateless: labels vary per call,
/// so handles are resolved through the global recorder each time.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// One attempt against one model; `outcome` is "success" or an error kind.
    pub fn record_provider_call(&self, provider: &str, model: &str, outcome: &str, elapsed: Duration) {
        metrics::counter!(
            "diagnosis_provider_calls_total",
            "provider" => provider.to_string(),
            "model" => model.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
        metrics::histogram!(
            "diagnosis_provider_call_duration_seconds",
            "provider" => provider.to_string()
        )
        .record(elapsed.as_secs_f64());
    }

    /// A 429 answer; the advertised wait is kept as a histogram when present.
    pub fn record_rate_limited(&self, provider: &str, retry_after: Option<Duration>) {
        metrics::counter!(
            "diagnosis_provider_rate_limited_total",
            "provider" => provider.to_string()
        )
        .increment(1);
        if let Some(wait) = retry_after {
            metrics::histogram!(
                "diagnosis_provider_retry_after_seconds",
                "provider" => provider.to_string()
            )
            .record(wait.as_secs_f64());
        }
    }

    pub fn record_fallback(&self, provider: &str, from_model: &str) {
        metrics::counter!(
            "diagnosis_model_fallbacks_total",
            "provider" => provider.to_string(),
            "from_model" => from_model.to_string()
        )
        .increment(1);
    }

    pub fn record_cell_settled(&self, provider: &str, state: &str) {
        metrics::counter!(
            "diagnosis_cells_settled_total",
            "provider" => provider.to_string(),
            "state" => state.to_string()
        )
        .increment(1);
    }

    pub fn record_job_finished(&self, status: &str, elapsed: Duration) {
        metrics::counter!("diagnosis_jobs_total", "status" => status.to_string()).increment(1);
        metrics::histogram!("diagnosis_job_duration_seconds").record(elapsed.as_secs_f64());
    }

    pub fn record_forced_timeouts(&self, count: usize) {
        metrics::counter!("diagnosis_cells_force_timed_out_total").increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        let metrics = MetricsCollector::new();
        metrics.record_provider_call("deepseek", "deepseek-chat", "success", Duration::from_millis(120));
        metrics.record_fallback("deepseek", "deepseek-chat");
        metrics.record_rate_limited("deepseek", Some(Duration::from_secs(5)));
        metrics.record_rate_limited("deepseek", None);
        metrics.record_cell_settled("deepseek", "success");
        metrics.record_job_finished("completed", Duration::from_secs(3));
        metrics.record_forced_timeouts(2);
    }

    #[test]
    fn test_invalid_metrics_address() {
        let err = init_metrics("not-an-address").unwrap_err();
        assert!(err.to_string().contains("not-an-address"));
    }
}
