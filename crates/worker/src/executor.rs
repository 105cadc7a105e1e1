//! # 容错调用执行器
//!
//! Executes one cell against its provider: breaker gate, hard per-attempt
//! timeout, and fallback through the provider's ordered model list. There is
//! no backoff retry against the same model.

use std::sync::Arc;

use diagnosis_config::ProviderProfile;
use diagnosis_domain::{
    Cell, CellError, CellErrorKind, CellResult, CellState, ProviderCallError, ProviderRequest,
};
use diagnosis_infrastructure::{CircuitBreakerRegistry, MetricsCollector};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::client_registry::ProviderClientRegistry;
use crate::latency::LatencyHistory;

#[derive(Clone)]
pub struct CallExecutor {
    clients: Arc<ProviderClientRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    latency: Arc<LatencyHistory>,
    metrics: MetricsCollector,
    system_prompt: Option<String>,
}

impl CallExecutor {
    pub fn new(clients: Arc<ProviderClientRegistry>, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            clients,
            breakers,
            latency: Arc::new(LatencyHistory::default()),
            metrics: MetricsCollector::new(),
            system_prompt: None,
        }
    }

    pub fn with_latency_history(mut self, latency: Arc<LatencyHistory>) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    /// Same clients and latency history, different breaker set. Used to give
    /// one job its own breakers.
    pub fn with_breakers(&self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            breakers,
            ..self.clone()
        }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn latency_history(&self) -> &Arc<LatencyHistory> {
        &self.latency
    }

    pub fn clients(&self) -> &ProviderClientRegistry {
        &self.clients
    }

    /// Never fails: every outcome, including "no client registered", is
    /// reported as a settled `CellResult`.
    #[instrument(skip_all, fields(cell_id = %cell.id, provider = %profile.id))]
    pub async fn execute(&self, cell: &Cell, profile: &ProviderProfile) -> CellResult {
        let provider = profile.id.as_str();
        let Some(client) = self.clients.get(provider) else {
            warn!("没有为该模型提供方注册客户端");
            return CellResult::failure(
                CellState::Failed,
                CellError::new(
                    CellErrorKind::Unknown,
                    format!("未注册模型提供方客户端: {provider}"),
                ),
                1,
            );
        };

        let breaker = self.breakers.get(provider);
        let prompt = cell.prompt();
        let max_attempts = profile.max_attempts();
        let started = Instant::now();
        let mut attempts: u32 = 0;
        let mut last_error: Option<CellError> = None;

        for (index, model) in profile.models.iter().take(max_attempts).enumerate() {
            if !breaker.allow() {
                if attempts == 0 {
                    debug!("熔断器已打开，快速失败");
                    return CellResult::failure(
                        CellState::Failed,
                        CellError::new(
                            CellErrorKind::CircuitOpen,
                            format!("模型提供方 {provider} 的熔断器已打开"),
                        ),
                        1,
                    );
                }
                // the breaker opened during this cell; report what actually failed
                break;
            }

            attempts += 1;
            let request = ProviderRequest {
                provider_id: provider.to_string(),
                model_id: model.clone(),
                prompt: prompt.clone(),
                system_prompt: self.system_prompt.clone(),
                timeout: profile.call_timeout,
            };

            let attempt_started = Instant::now();
            let outcome = match tokio::time::timeout(profile.call_timeout, client.call(&request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderCallError::Timeout(format!(
                    "{}ms 内未返回",
                    profile.call_timeout.as_millis()
                ))),
            };
            let elapsed = attempt_started.elapsed();

            match outcome {
                Ok(response) => {
                    breaker.record_success();
                    self.latency.record(provider, model, elapsed, true);
                    self.metrics
                        .record_provider_call(provider, model, "success", elapsed);
                    debug!(model = %model, attempts, elapsed_ms = elapsed.as_millis() as u64, "调用成功");
                    return CellResult::success(
                        response.raw_text,
                        model.clone(),
                        attempts,
                        started.elapsed().as_millis() as u64,
                    );
                }
                Err(err) => {
                    let kind = err.kind();
                    if kind.trips_breaker() {
                        breaker.record_failure();
                    } else {
                        breaker.record_ignored();
                    }
                    self.latency.record(provider, model, elapsed, false);
                    self.metrics
                        .record_provider_call(provider, model, kind.as_str(), elapsed);
                    if kind == CellErrorKind::RateLimited {
                        let retry_after = err.retry_after();
                        self.metrics.record_rate_limited(provider, retry_after);
                        warn!(
                            model = %model,
                            retry_after_secs = retry_after.map(|d| d.as_secs()),
                            "模型提供方限流"
                        );
                    }

                    last_error = Some(CellError::new(kind, err.to_string()).with_model(model.clone()));

                    if !kind.is_retryable() {
                        info!(model = %model, error = %err, "不可重试的错误，停止尝试");
                        break;
                    }
                    if index + 1 < max_attempts {
                        self.metrics.record_fallback(provider, model);
                        warn!(model = %model, error = %err, "调用失败，切换到下一个模型");
                    } else {
                        warn!(model = %model, error = %err, "调用失败，已无可用的备选模型");
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| {
            CellError::new(
                CellErrorKind::Unknown,
                format!("模型提供方 {provider} 没有配置可用模型"),
            )
        });
        let state = if error.kind == CellErrorKind::Timeout {
            CellState::TimedOut
        } else {
            CellState::Failed
        };
        CellResult::failure(state, error, attempts.max(1))
    }
}

impl std::fmt::Debug for CallExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallExecutor")
            .field("clients", &self.clients)
            .field("system_prompt", &self.system_prompt)
            .finish()
    }
}
