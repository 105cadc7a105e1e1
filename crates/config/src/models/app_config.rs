use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    dispatcher_worker::{ExecutorConfig, SchedulerConfig},
    observability::ObservabilityConfig,
    provider::{ProviderConfig, ProviderProfile},
};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::validation::ConfigValidator;

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
    /// Breaker defaults; each provider may override any field
    pub circuit_breaker: CircuitBreakerConfig,
    pub providers: BTreeMap<String, ProviderConfig>,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Built-in defaults
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: DIAGNOSIS, separator: `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/diagnosis.toml", "diagnosis.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("DIAGNOSIS")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Resolved settings for one provider, `None` if it is not configured.
    pub fn provider_profile(&self, provider_id: &str) -> Option<ProviderProfile> {
        self.providers.get(provider_id).map(|provider| {
            ProviderProfile::resolve(
                provider_id,
                provider,
                self.executor.call_timeout,
                &self.circuit_breaker,
            )
        })
    }

    pub fn provider_profiles(&self) -> Vec<ProviderProfile> {
        self.providers
            .keys()
            .filter_map(|id| self.provider_profile(id))
            .collect()
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.scheduler.validate()?;
        self.executor.validate()?;
        self.circuit_breaker.validate()?;
        for (id, provider) in &self.providers {
            provider.validate_for(id, &self.circuit_breaker)?;
        }
        self.observability.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BreakerScope, LogLevel, OutputFormat};
    use std::io::Write;
    use std::time::Duration;

    const SAMPLE: &str = r#"
[scheduler]
concurrency = 6
job_timeout = 300
stall_timeout = 120
progress_batch_size = 3
breaker_scope = "job"

[executor]
call_timeout = 20
system_prompt = "Answer in JSON."

[circuit_breaker]
failure_threshold = 5
recovery_timeout = 60
success_threshold = 2

[providers.deepseek]
display_name = "DeepSeek"
base_url = "https://api.deepseek.com/v1"
api_key_env = "DEEPSEEK_API_KEY"
models = ["deepseek-chat", "deepseek-reasoner"]

[providers.doubao]
base_url = "https://ark.cn-beijing.volces.com/api/v3"
models = ["doubao-pro-32k"]
call_timeout_seconds = 45
circuit_breaker = { failure_threshold = 3 }

[observability]
log_level = "debug"
log_format = "json"
"#;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler.concurrency, 8);
        assert_eq!(config.executor.call_timeout, Duration::from_secs(30));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert!(config.providers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_from_toml() {
        let config = AppConfig::from_toml(SAMPLE).expect("Failed to parse TOML");
        assert_eq!(config.scheduler.concurrency, 6);
        assert_eq!(config.scheduler.job_timeout, Duration::from_secs(300));
        assert_eq!(config.scheduler.breaker_scope, BreakerScope::Job);
        assert_eq!(config.executor.system_prompt.as_deref(), Some("Answer in JSON."));
        assert_eq!(config.observability.log_level, LogLevel::Debug);
        assert_eq!(config.observability.log_format, OutputFormat::Json);
        assert_eq!(config.providers.len(), 2);
    }

    #[test]
    fn test_provider_profiles() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();

        let deepseek = config.provider_profile("deepseek").unwrap();
        assert_eq!(deepseek.display_name, "DeepSeek");
        assert_eq!(deepseek.call_timeout, Duration::from_secs(20));
        assert_eq!(deepseek.circuit_breaker.failure_threshold, 5);
        assert_eq!(deepseek.max_attempts(), 2);

        let doubao = config.provider_profile("doubao").unwrap();
        assert_eq!(doubao.call_timeout, Duration::from_secs(45));
        assert_eq!(doubao.circuit_breaker.failure_threshold, 3);

        assert!(config.provider_profile("kimi").is_none());
        assert_eq!(config.provider_profiles().len(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let toml_str = r#"
[scheduler]
concurrency = 0
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());

        let toml_str = r#"
[providers.bad]
models = ["m"]
max_attempts = 0
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_toml_round_trip_preserves_config() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let serialized = config.to_toml().unwrap();
        let reparsed = AppConfig::from_toml(&serialized).unwrap();
        assert_eq!(config, reparsed);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.scheduler.concurrency, 6);
        assert!(config.providers.contains_key("doubao"));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = AppConfig::load(Some("/definitely/not/here/diagnosis.toml"));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("配置文件不存在"));
    }
}
