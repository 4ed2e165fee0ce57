//! Resilience: retry budgets, backoff and call deadlines
//!
//! Shared by every failure category. A category's [`RetryPolicy`] bounds how
//! many retries it gets and how long to wait before each one; [`with_deadline`]
//! turns a hung backend call into an ordinary transient failure.
//!
//! # Backoff
//!
//! ```text
//! delay(n) = min(initial * multiplier^n, max)      n = retries already made
//!
//! initial=500ms multiplier=2 max=10s
//!   n=0 → 500ms, n=1 → 1s, n=2 → 2s, ... n=5 → 10s (capped)
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::contracts::ApiError;

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSchedule {
    pub initial_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            multiplier: 2.0,
            max_ms: 10_000,
        }
    }
}

impl BackoffSchedule {
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            initial_ms: ms,
            multiplier: 1.0,
            max_ms: ms,
        }
    }

    /// Delay before the retry that follows `retries_done` earlier retries.
    pub fn delay_for(&self, retries_done: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retries_done.min(32) as i32);
        let raw = self.initial_ms as f64 * factor;
        let capped = raw.min(self.max_ms.max(self.initial_ms) as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Retry budget for one failure category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure. Zero means the first failure
    /// is already terminal.
    pub max_retries: u32,
    pub backoff: BackoffSchedule,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffSchedule::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: BackoffSchedule) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Whether another retry is allowed after `retries_done` retries.
    pub fn allows_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}

/// Run a backend call under a deadline.
///
/// An elapsed deadline is reported as [`ApiError::Transient`], so it flows
/// through the same retry and escalation path as any other failure.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Transient(format!(
            "call timed out after {}ms",
            deadline.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = BackoffSchedule::default();
        assert_eq!(backoff.delay_for(0), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for(5), Duration::from_millis(10_000));
        assert_eq!(backoff.delay_for(1_000), Duration::from_millis(10_000));
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = BackoffSchedule::fixed(Duration::from_millis(250));
        for n in 0..5 {
            assert_eq!(backoff.delay_for(n), Duration::from_millis(250));
        }
    }

    #[test]
    fn test_multiplier_below_one_never_shrinks() {
        let backoff = BackoffSchedule {
            initial_ms: 100,
            multiplier: 0.5,
            max_ms: 1_000,
        };
        assert_eq!(backoff.delay_for(3), Duration::from_millis(100));
    }

    #[test]
    fn test_retry_policy_budget() {
        let policy = RetryPolicy::new(2, BackoffSchedule::default());
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));

        let none = RetryPolicy::new(0, BackoffSchedule::default());
        assert!(!none.allows_retry(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_maps_timeout_to_transient() {
        let result: Result<(), ApiError> = with_deadline(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ApiError::Transient(_))));
    }

    #[tokio::test]
    async fn test_with_deadline_passes_through() {
        let ok = with_deadline(Duration::from_secs(1), async { Ok::<_, ApiError>(7) }).await;
        assert_eq!(ok, Ok(7));

        let fatal: Result<(), ApiError> = with_deadline(Duration::from_secs(1), async {
            Err(ApiError::Fatal("garbled".into()))
        })
        .await;
        assert_eq!(fatal, Err(ApiError::Fatal("garbled".into())));
    }
}
