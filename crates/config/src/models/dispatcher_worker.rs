use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration_serde;
use crate::validation::{ConfigValidator, ValidationUtils};

/// Whether circuit breakers outlive a single diagnosis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerScope {
    /// One registry shared by every job in the process
    #[default]
    Process,
    /// A fresh registry per job run
    Job,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool size per job
    pub concurrency: usize,
    /// Hard ceiling for one job run (seconds)
    #[serde(with = "duration_serde::secs")]
    pub job_timeout: Duration,
    /// Maximum time without any cell settling (seconds)
    #[serde(with = "duration_serde::secs")]
    pub stall_timeout: Duration,
    /// How often the stall watchdog checks progress (milliseconds)
    #[serde(with = "duration_serde::millis")]
    pub watchdog_interval: Duration,
    /// Settlements between intermediate progress writes
    pub progress_batch_size: usize,
    pub max_cells: usize,
    pub breaker_scope: BreakerScope,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            job_timeout: Duration::from_secs(600),
            stall_timeout: Duration::from_secs(480),
            watchdog_interval: Duration::from_millis(1000),
            progress_batch_size: 5,
            max_cells: 1000,
            breaker_scope: BreakerScope::Process,
        }
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_count(self.concurrency, "scheduler.concurrency", 256)?;
        ValidationUtils::validate_timeout(self.job_timeout, "scheduler.job_timeout")?;
        ValidationUtils::validate_timeout(self.stall_timeout, "scheduler.stall_timeout")?;
        ValidationUtils::validate_timeout(self.watchdog_interval, "scheduler.watchdog_interval")?;
        ValidationUtils::validate_count(
            self.progress_batch_size,
            "scheduler.progress_batch_size",
            10000,
        )?;
        ValidationUtils::validate_count(self.max_cells, "scheduler.max_cells", 100_000)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Default per-attempt provider timeout (seconds)
    #[serde(with = "duration_serde::secs")]
    pub call_timeout: Duration,
    /// Samples kept per provider for latency monitoring
    pub latency_history_capacity: usize,
    /// Optional system prompt sent along with every question
    pub system_prompt: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            latency_history_capacity: 256,
            system_prompt: None,
        }
    }
}

impl ConfigValidator for ExecutorConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_timeout(self.call_timeout, "executor.call_timeout")?;
        ValidationUtils::validate_count(
            self.latency_history_capacity,
            "executor.latency_history_capacity",
            100_000,
        )?;
        Ok(())
    }
}
