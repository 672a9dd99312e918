//! Engine configuration.

use crate::quota::QuotaPolicy;
use crate::step::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Tunables for the orchestrator and step journal.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Executions allowed per owner per month without a subscription.
    #[serde(default = "default_monthly_execution_limit")]
    pub monthly_execution_limit: u64,
    /// Attempts per step, including the first.
    #[serde(default = "default_step_max_attempts")]
    pub step_max_attempts: u32,
    /// Base backoff before the first retry, in milliseconds.
    #[serde(default = "default_step_retry_base_ms")]
    pub step_retry_base_ms: u64,
}

fn default_monthly_execution_limit() -> u64 {
    100
}

fn default_step_max_attempts() -> u32 {
    3
}

fn default_step_retry_base_ms() -> u64 {
    200
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            monthly_execution_limit: default_monthly_execution_limit(),
            step_max_attempts: default_step_max_attempts(),
            step_retry_base_ms: default_step_retry_base_ms(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.step_max_attempts.max(1),
            base_delay: Duration::from_millis(self.step_retry_base_ms),
        }
    }

    #[must_use]
    pub fn quota_policy(&self) -> QuotaPolicy {
        QuotaPolicy {
            monthly_limit: self.monthly_execution_limit,
        }
    }
}
