use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerOverrides};
use crate::validation::{ConfigValidator, ValidationUtils};
use crate::ConfigError;

/// One answer-engine provider as written in the config file.
///
/// `models` is the model-fallback list: the first entry is the primary model,
/// the rest are tried in order when an attempt fails with a retryable error.
/// An empty list is accepted here; selecting such a provider for a job fails
/// at job initialization instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub display_name: Option<String>,
    /// OpenAI-compatible API root, e.g. `https://api.deepseek.com/v1`
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    pub models: Vec<String>,
    pub call_timeout_seconds: Option<u64>,
    pub max_attempts: Option<usize>,
    pub circuit_breaker: CircuitBreakerOverrides,
}

impl ProviderConfig {
    pub fn with_models<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            models: models.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn validate_for(&self, id: &str, defaults: &CircuitBreakerConfig) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(id, "providers.<id>")?;
        for model in &self.models {
            ValidationUtils::validate_not_empty(model, &format!("providers.{id}.models"))?;
        }
        if let Some(base_url) = &self.base_url {
            ValidationUtils::validate_url(base_url, &format!("providers.{id}.base_url"))?;
        }
        if let Some(secs) = self.call_timeout_seconds {
            ValidationUtils::validate_timeout(
                Duration::from_secs(secs),
                &format!("providers.{id}.call_timeout_seconds"),
            )?;
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::Validation(format!(
                "providers.{id}.max_attempts must be greater than 0"
            )));
        }
        self.circuit_breaker
            .apply(defaults)
            .validate()
            .map_err(|e| ConfigError::Validation(format!("providers.{id}.circuit_breaker: {e}")))
    }
}

/// Resolved per-provider settings handed to the breaker registry and the call executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderProfile {
    pub id: String,
    pub display_name: String,
    pub models: Vec<String>,
    pub call_timeout: Duration,
    configured_max_attempts: Option<usize>,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl ProviderProfile {
    pub fn resolve(
        id: &str,
        provider: &ProviderConfig,
        default_call_timeout: Duration,
        breaker_defaults: &CircuitBreakerConfig,
    ) -> Self {
        Self {
            id: id.to_string(),
            display_name: provider
                .display_name
                .clone()
                .unwrap_or_else(|| id.to_string()),
            models: provider.models.clone(),
            call_timeout: provider
                .call_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(default_call_timeout),
            configured_max_attempts: provider.max_attempts,
            circuit_breaker: provider.circuit_breaker.apply(breaker_defaults),
        }
    }

    /// Builds a profile directly, mostly for tests and embedded use.
    pub fn new<I, S>(id: &str, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.to_string(),
            display_name: id.to_string(),
            models: models.into_iter().map(Into::into).collect(),
            call_timeout: Duration::from_secs(30),
            configured_max_attempts: None,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.configured_max_attempts = Some(max_attempts);
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Attempts allowed for one cell: the fallback list length unless capped
    /// lower, never below one.
    pub fn max_attempts(&self) -> usize {
        let by_models = self.models.len().max(1);
        self.configured_max_attempts
            .map(|n| n.min(by_models))
            .unwrap_or(by_models)
            .max(1)
    }

    pub fn primary_model(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }
}

impl ConfigValidator for ProviderProfile {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.models.is_empty() {
            return Err(ConfigError::Validation(format!(
                "provider {} has no configured models",
                self.id
            )));
        }
        self.circuit_breaker.validate()
    }
}
