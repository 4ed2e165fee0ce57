//! Orchestrator configuration.
//!
//! Static settings consumed (not owned) by a table orchestrator at
//! construction. Every field has a default; the defaults can be overridden
//! through `ROUND_*` environment variables or a deserialized config file.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::escalation::FailureCategory;
use crate::resilience::{BackoffSchedule, RetryPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Seconds from the environment as milliseconds, clamped at `u64::MAX`.
fn secs_as_ms(secs: u64) -> u64 {
    secs.saturating_mul(1_000)
}

/// Retry budget per failure category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicies {
    pub no_start: RetryPolicy,
    pub no_bet_stop: RetryPolicy,
    pub no_deal: RetryPolicy,
    pub no_finish: RetryPolicy,
    pub device_fault: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        let max_retries = env_or("ROUND_MAX_RETRIES", 3);
        let backoff = BackoffSchedule::default();
        Self {
            no_start: RetryPolicy::new(env_or("ROUND_START_MAX_RETRIES", 5), backoff),
            no_bet_stop: RetryPolicy::new(max_retries, backoff),
            no_deal: RetryPolicy::new(max_retries, backoff),
            no_finish: RetryPolicy::new(max_retries, backoff),
            device_fault: RetryPolicy::new(0, backoff),
        }
    }
}

impl RetryPolicies {
    pub fn get(&self, category: FailureCategory) -> &RetryPolicy {
        match category {
            FailureCategory::NoStart => &self.no_start,
            FailureCategory::NoBetStop => &self.no_bet_stop,
            FailureCategory::NoDeal => &self.no_deal,
            FailureCategory::NoFinish => &self.no_finish,
            FailureCategory::DeviceFault => &self.device_fault,
        }
    }

    pub fn get_mut(&mut self, category: FailureCategory) -> &mut RetryPolicy {
        match category {
            FailureCategory::NoStart => &mut self.no_start,
            FailureCategory::NoBetStop => &mut self.no_bet_stop,
            FailureCategory::NoDeal => &mut self.no_deal,
            FailureCategory::NoFinish => &mut self.no_finish,
            FailureCategory::DeviceFault => &mut self.device_fault,
        }
    }
}

/// Settings for one table orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Deadline applied to every backend call
    pub call_timeout_ms: u64,
    /// Ceiling on waiting for the device result after betting closes
    pub result_wait_secs: u64,
    /// Interval between polls of the backend pause marker
    pub pause_poll_ms: u64,
    /// Whether the backend wants an explicit stop-bet call
    pub notify_bet_stop: bool,
    /// Open the next round as soon as one finishes
    pub auto_reopen: bool,
    /// Leave Error on its own after this long
    pub auto_recover_after_secs: Option<u64>,
    /// Capacity of the table's event queue
    pub queue_capacity: usize,
    pub retry: RetryPolicies,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: env_or("ROUND_CALL_TIMEOUT_MS", 5_000),
            result_wait_secs: env_or("ROUND_RESULT_WAIT_SECS", 90),
            pause_poll_ms: secs_as_ms(env_or("ROUND_PAUSE_POLL_SECS", 5)),
            notify_bet_stop: env_or("ROUND_NOTIFY_BET_STOP", true),
            auto_reopen: env_or("ROUND_AUTO_REOPEN", false),
            auto_recover_after_secs: std::env::var("ROUND_AUTO_RECOVER_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
            queue_capacity: 256,
            retry: RetryPolicies::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn result_wait(&self) -> Duration {
        Duration::from_secs(self.result_wait_secs)
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    pub fn auto_recover_after(&self) -> Option<Duration> {
        self.auto_recover_after_secs.map(Duration::from_secs)
    }

    pub fn policy(&self, category: FailureCategory) -> &RetryPolicy {
        self.retry.get(category)
    }

    /// Override the retry budget of one category.
    pub fn with_max_retries(mut self, category: FailureCategory, max_retries: u32) -> Self {
        self.retry.get_mut(category).max_retries = max_retries;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "call_timeout_ms",
            });
        }
        if self.result_wait_secs == 0 {
            return Err(ConfigError::Zero {
                field: "result_wait_secs",
            });
        }
        if self.pause_poll_ms == 0 {
            return Err(ConfigError::Zero {
                field: "pause_poll_ms",
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "queue_capacity",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.policy(FailureCategory::DeviceFault).max_retries, 0);
        assert!(config.notify_bet_stop);
    }

    #[test]
    fn test_with_max_retries_targets_one_category() {
        let config = OrchestratorConfig::default().with_max_retries(FailureCategory::NoDeal, 7);
        assert_eq!(config.policy(FailureCategory::NoDeal).max_retries, 7);
        assert_ne!(config.policy(FailureCategory::NoFinish).max_retries, 7);
    }

    #[test]
    fn test_poll_seconds_clamp_instead_of_overflowing() {
        assert_eq!(secs_as_ms(5), 5_000);
        assert_eq!(secs_as_ms(u64::MAX), u64::MAX);
        assert_eq!(secs_as_ms(u64::MAX / 1_000 + 1), u64::MAX);
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let config = OrchestratorConfig {
            pause_poll_ms: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "pause_poll_ms"
            })
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
            result_wait_secs = 30

            [retry.no_deal]
            max_retries = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.result_wait(), Duration::from_secs(30));
        assert_eq!(config.policy(FailureCategory::NoDeal).max_retries, 2);
        assert_eq!(
            config.policy(FailureCategory::NoDeal).backoff,
            BackoffSchedule::default()
        );
        assert_eq!(config.policy(FailureCategory::DeviceFault).max_retries, 0);
    }
}
