use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration_serde;
use crate::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive breaker-relevant failures that open the circuit
    pub failure_threshold: usize,
    /// How long an open circuit rejects calls before admitting a probe
    #[serde(with = "duration_serde::secs")]
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: usize,
    /// Probe calls admitted concurrently while half-open
    pub half_open_max_calls: usize,
    /// Growth factor applied to the recovery timeout after a failed probe
    pub backoff_multiplier: f64,
    #[serde(with = "duration_serde::secs")]
    pub max_recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
            half_open_max_calls: 1,
            backoff_multiplier: 1.0,
            max_recovery_timeout: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }

        if self.success_threshold == 0 {
            return Err(ConfigError::Validation(
                "success_threshold must be greater than 0".to_string(),
            ));
        }

        if self.half_open_max_calls == 0 {
            return Err(ConfigError::Validation(
                "half_open_max_calls must be greater than 0".to_string(),
            ));
        }

        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "backoff_multiplier must be greater than or equal to 1.0".to_string(),
            ));
        }

        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "recovery_timeout must be greater than 0".to_string(),
            ));
        }

        if self.recovery_timeout > self.max_recovery_timeout {
            return Err(ConfigError::Validation(
                "recovery_timeout must be less than or equal to max_recovery_timeout".to_string(),
            ));
        }

        Ok(())
    }
}

/// Per-provider breaker settings layered over the global defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerOverrides {
    pub failure_threshold: Option<usize>,
    pub recovery_timeout_seconds: Option<u64>,
    pub success_threshold: Option<usize>,
    pub half_open_max_calls: Option<usize>,
    pub backoff_multiplier: Option<f64>,
    pub max_recovery_timeout_seconds: Option<u64>,
}

impl CircuitBreakerOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, base: &CircuitBreakerConfig) -> CircuitBreakerConfig {
        let mut merged = base.clone();
        if let Some(v) = self.failure_threshold {
            merged.failure_threshold = v;
        }
        if let Some(v) = self.recovery_timeout_seconds {
            merged.recovery_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.success_threshold {
            merged.success_threshold = v;
        }
        if let Some(v) = self.half_open_max_calls {
            merged.half_open_max_calls = v;
        }
        if let Some(v) = self.backoff_multiplier {
            merged.backoff_multiplier = v;
        }
        if let Some(v) = self.max_recovery_timeout_seconds {
            merged.max_recovery_timeout = Duration::from_secs(v);
        }
        if merged.max_recovery_timeout < merged.recovery_timeout {
            merged.max_recovery_timeout = merged.recovery_timeout;
        }
        merged
    }
}
