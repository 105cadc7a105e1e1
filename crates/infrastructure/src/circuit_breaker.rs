//! Per-provider circuit breaker
//!
//! Three-state gate (closed / open / half-open) shared by every in-flight call
//! to one provider. State lives behind a std mutex that is never held across
//! an await point, and time comes from `tokio::time::Instant` so a paused
//! test clock drives recovery deterministically.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use diagnosis_config::{CircuitBreakerConfig, CircuitState, ProviderProfile};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct BreakerStats {
    state: CircuitState,
    consecutive_failures: usize,
    consecutive_successes: usize,
    opened_at: Option<Instant>,
    current_recovery_timeout: Duration,
    half_open_in_flight: usize,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
    last_state_change: Instant,
}

impl BreakerStats {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            current_recovery_timeout: config.recovery_timeout,
            half_open_in_flight: 0,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            last_state_change: Instant::now(),
        }
    }
}

/// Point-in-time view of one breaker, for monitoring and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub provider_id: String,
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub consecutive_successes: usize,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub current_recovery_timeout: Duration,
    /// Time since the circuit last opened, while open
    pub open_for: Option<Duration>,
}

impl CircuitBreakerSnapshot {
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failed_calls as f64 / self.total_calls as f64
        }
    }
}

pub struct CircuitBreaker {
    provider_id: String,
    config: CircuitBreakerConfig,
    stats: Mutex<BreakerStats>,
}

impl CircuitBreaker {
    pub fn new(provider_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let stats = BreakerStats::new(&config);
        Self {
            provider_id: provider_id.into(),
            config,
            stats: Mutex::new(stats),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerStats> {
        // every critical section leaves the stats consistent
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Asks for permission to call the provider. Returns false while the
    /// circuit is open, or when the half-open probe budget is used up.
    pub fn allow(&self) -> bool {
        let mut stats = self.lock();
        let admitted = match stats.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = stats
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= stats.current_recovery_timeout {
                    self.transition(&mut stats, CircuitState::HalfOpen);
                    stats.half_open_in_flight = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if stats.half_open_in_flight < self.config.half_open_max_calls {
                    stats.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        };

        if !admitted {
            stats.rejected_calls += 1;
            metrics::counter!(
                "diagnosis_breaker_rejections_total",
                "provider" => self.provider_id.clone()
            )
            .increment(1);
            debug!(provider = %self.provider_id, state = %stats.state, "熔断器拒绝调用");
        }
        admitted
    }

    pub fn record_success(&self) {
        let mut stats = self.lock();
        stats.total_calls += 1;
        stats.successful_calls += 1;

        match stats.state {
            CircuitState::Closed => {
                stats.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                stats.half_open_in_flight = stats.half_open_in_flight.saturating_sub(1);
                stats.consecutive_successes += 1;
                if stats.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut stats, CircuitState::Closed);
                }
            }
            // a call admitted before the circuit opened; the open window stands
            CircuitState::Open => {}
        }
    }

    /// Records a breaker-relevant failure (timeout, connection, throttle, 5xx).
    pub fn record_failure(&self) {
        let mut stats = self.lock();
        stats.total_calls += 1;
        stats.failed_calls += 1;

        match stats.state {
            CircuitState::Closed => {
                stats.consecutive_successes = 0;
                stats.consecutive_failures += 1;
                if stats.consecutive_failures >= self.config.failure_threshold {
                    stats.current_recovery_timeout = self.config.recovery_timeout;
                    self.transition(&mut stats, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                stats.half_open_in_flight = stats.half_open_in_flight.saturating_sub(1);
                let grown = stats
                    .current_recovery_timeout
                    .mul_f64(self.config.backoff_multiplier);
                stats.current_recovery_timeout = grown.min(self.config.max_recovery_timeout);
                self.transition(&mut stats, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Releases an admitted call whose outcome says nothing about provider
    /// health (e.g. a rejected request). Frees its half-open probe slot.
    pub fn record_ignored(&self) {
        let mut stats = self.lock();
        stats.total_calls += 1;
        if stats.state == CircuitState::HalfOpen {
            stats.half_open_in_flight = stats.half_open_in_flight.saturating_sub(1);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let stats = self.lock();
        CircuitBreakerSnapshot {
            provider_id: self.provider_id.clone(),
            state: stats.state,
            consecutive_failures: stats.consecutive_failures,
            consecutive_successes: stats.consecutive_successes,
            total_calls: stats.total_calls,
            successful_calls: stats.successful_calls,
            failed_calls: stats.failed_calls,
            rejected_calls: stats.rejected_calls,
            current_recovery_timeout: stats.current_recovery_timeout,
            open_for: match stats.state {
                CircuitState::Open => stats.opened_at.map(|at| at.elapsed()),
                _ => None,
            },
        }
    }

    pub fn force_open(&self) {
        let mut stats = self.lock();
        self.transition(&mut stats, CircuitState::Open);
    }

    pub fn force_close(&self) {
        let mut stats = self.lock();
        stats.current_recovery_timeout = self.config.recovery_timeout;
        self.transition(&mut stats, CircuitState::Closed);
    }

    pub fn reset(&self) {
        let mut stats = self.lock();
        *stats = BreakerStats::new(&self.config);
        info!(provider = %self.provider_id, "熔断器已重置");
    }

    fn transition(&self, stats: &mut BreakerStats, to: CircuitState) {
        let from = stats.state;
        let now = Instant::now();
        stats.state = to;
        stats.last_state_change = now;
        match to {
            CircuitState::Open => {
                stats.opened_at = Some(now);
                stats.consecutive_successes = 0;
                stats.half_open_in_flight = 0;
                warn!(
                    provider = %self.provider_id,
                    from = %from,
                    consecutive_failures = stats.consecutive_failures,
                    recovery_timeout_ms = stats.current_recovery_timeout.as_millis() as u64,
                    "熔断器打开"
                );
            }
            CircuitState::HalfOpen => {
                stats.consecutive_successes = 0;
                stats.half_open_in_flight = 0;
                info!(provider = %self.provider_id, "熔断器进入半开状态，允许探测调用");
            }
            CircuitState::Closed => {
                stats.opened_at = None;
                stats.consecutive_failures = 0;
                stats.consecutive_successes = 0;
                stats.half_open_in_flight = 0;
                info!(provider = %self.provider_id, from = %from, "熔断器关闭，服务已恢复");
            }
        }
        metrics::counter!(
            "diagnosis_breaker_transitions_total",
            "provider" => self.provider_id.clone(),
            "to" => to.to_string()
        )
        .increment(1);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("provider_id", &self.provider_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Lazily creates one breaker per provider id, configured from the
/// provider's merged settings or the registry defaults.
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerConfig,
    configs: HashMap<String, CircuitBreakerConfig>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            configs: HashMap::new(),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_profiles<'a, I>(defaults: CircuitBreakerConfig, profiles: I) -> Self
    where
        I: IntoIterator<Item = &'a ProviderProfile>,
    {
        let mut registry = Self::new(defaults);
        for profile in profiles {
            registry
                .configs
                .insert(profile.id.clone(), profile.circuit_breaker.clone());
        }
        registry
    }

    pub fn with_provider(mut self, provider_id: &str, config: CircuitBreakerConfig) -> Self {
        self.configs.insert(provider_id.to_string(), config);
        self
    }

    /// Same configuration, no breaker state. Used for job-scoped breakers.
    pub fn fresh(&self) -> Self {
        Self {
            defaults: self.defaults.clone(),
            configs: self.configs.clone(),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, provider_id: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider_id)
        {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        let breaker = breakers.entry(provider_id.to_string()).or_insert_with(|| {
            let config = self
                .configs
                .get(provider_id)
                .cloned()
                .unwrap_or_else(|| self.defaults.clone());
            debug!(provider = provider_id, "创建熔断器");
            Arc::new(CircuitBreaker::new(provider_id, config))
        });
        Arc::clone(breaker)
    }

    /// Snapshots of every breaker created so far, ordered by provider id.
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let breakers = self.breakers.read().unwrap_or_else(PoisonError::into_inner);
        let mut snapshots: Vec<_> = breakers.values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        snapshots
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failure_threshold: usize, success_threshold: usize) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            success_threshold,
            recovery_timeout: Duration::from_secs(60),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new("doubao", config(3, 2));
        for _ in 0..2 {
            assert!(cb.allow());
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        assert!(cb.allow());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.consecutive_failures, 3);
        assert_eq!(snapshot.rejected_calls, 1);
        assert!(snapshot.open_for.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_streak() {
        let cb = CircuitBreaker::new("qwen", config(3, 2));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_for_whole_recovery_window() {
        let cb = CircuitBreaker::new("deepseek", config(1, 1));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!cb.allow());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_success_threshold() {
        let cb = CircuitBreaker::new("deepseek", config(1, 2));
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(cb.allow());
        // one probe at a time by default
        assert!(!cb.allow());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(cb.allow());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow());
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_backoff() {
        let cfg = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            max_recovery_timeout: Duration::from_secs(15),
            ..Default::default()
        };
        let cb = CircuitBreaker::new("kimi", cfg);
        cb.record_failure();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cb.allow());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().current_recovery_timeout, Duration::from_secs(15));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!cb.allow());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cb.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_outcome_frees_probe_slot() {
        let cb = CircuitBreaker::new("kimi", config(1, 1));
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(cb.allow());
        assert!(!cb.allow());
        cb.record_ignored();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_and_reset() {
        let cb = CircuitBreaker::new("kimi", config(5, 2));
        cb.force_open();
        assert!(!cb.allow());
        cb.force_close();
        assert!(cb.allow());

        cb.record_failure();
        cb.reset();
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.total_calls, 0);
        assert_eq!(snapshot.failed_calls, 0);
    }

    #[tokio::test]
    async fn test_concurrent_failures_open_once() {
        let cb = Arc::new(CircuitBreaker::new("deepseek", config(50, 2)));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let cb = Arc::clone(&cb);
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    if cb.allow() {
                        cb.record_failure();
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failed_calls, 50);
        assert_eq!(snapshot.rejected_calls, 50);
    }

    #[test]
    fn test_registry_uses_provider_config() {
        let flaky = ProviderProfile::new("doubao", ["doubao-pro"]).with_circuit_breaker(config(3, 2));
        let registry =
            CircuitBreakerRegistry::from_profiles(CircuitBreakerConfig::default(), [&flaky]);

        let doubao = registry.get("doubao");
        assert_eq!(doubao.config().failure_threshold, 3);
        assert!(Arc::ptr_eq(&doubao, &registry.get("doubao")));
        assert_eq!(registry.get("unknown").config().failure_threshold, 5);

        doubao.force_open();
        let fresh = registry.fresh();
        assert_eq!(fresh.get("doubao").state(), CircuitState::Closed);
        assert_eq!(fresh.get("doubao").config().failure_threshold, 3);
        assert_eq!(registry.snapshots().len(), 2);
    }
}
