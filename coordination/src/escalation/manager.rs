//! Escalation Manager: deterministic Warn/Error decisions per failure episode
//!
//! Owns the table's [`FailureEpisode`]s. The orchestrator reports failures and
//! successes; the manager answers which severity, if any, must be sent now.
//! No I/O happens here.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contracts::ApiError;
use crate::escalation::state::{EscalationLevel, FailureCategory, FailureEpisode, Severity};
use crate::resilience::RetryPolicy;

/// Outcome of recording one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDecision {
    pub category: FailureCategory,
    /// 1-based attempt number that just failed
    pub attempt: u32,
    /// Severity to send now, if any
    pub signal: Option<Severity>,
    /// When to retry; `None` once the budget is spent or the failure is fatal
    pub retry_after: Option<Duration>,
}

impl FailureDecision {
    /// No further retry will be made in this episode.
    pub fn exhausted(&self) -> bool {
        self.retry_after.is_none()
    }
}

/// Per-table escalation bookkeeping.
#[derive(Debug, Default)]
pub struct EscalationManager {
    episodes: BTreeMap<FailureCategory, FailureEpisode>,
}

impl EscalationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a signal is due for `category` given the retry count.
    ///
    /// Warn fires at most once while retries remain; Error fires at most once
    /// once they are spent, even if Warn never fired (`max_retries == 0`).
    pub fn should_escalate(
        &mut self,
        category: FailureCategory,
        retry_count: u32,
        max_retries: u32,
    ) -> Option<Severity> {
        let episode = self
            .episodes
            .entry(category)
            .or_insert_with(|| FailureEpisode::new(category));

        let severity = if retry_count < max_retries {
            Severity::Warn
        } else {
            Severity::Error
        };

        match (severity, episode.level) {
            (Severity::Warn, EscalationLevel::None) => {
                episode.level = EscalationLevel::Warned;
                Some(Severity::Warn)
            }
            (Severity::Error, level) if level != EscalationLevel::Errored => {
                episode.level = EscalationLevel::Errored;
                Some(Severity::Error)
            }
            _ => None,
        }
    }

    /// Record a failed call and decide on signal and retry.
    ///
    /// Transient failures consume the category budget. Fatal failures skip it
    /// and go straight to Error. A conflict is not a failure: it leaves the
    /// episode untouched and yields neither signal nor retry.
    pub fn record_failure(
        &mut self,
        category: FailureCategory,
        policy: &RetryPolicy,
        error: &ApiError,
    ) -> FailureDecision {
        if error.is_conflict() {
            debug!(category = %category, "Conflict not recorded as a failure");
            return FailureDecision {
                category,
                attempt: self.retry_count(category) + 1,
                signal: None,
                retry_after: None,
            };
        }
        if !error.is_retriable() {
            return self.record_terminal(category, policy, error);
        }

        let episode = self
            .episodes
            .entry(category)
            .or_insert_with(|| FailureEpisode::new(category));
        episode.observe(&error.to_string());
        let retries_done = episode.retry_count;
        let attempt = retries_done + 1;

        let signal = self.should_escalate(category, retries_done, policy.max_retries);
        let retry_after = if policy.allows_retry(retries_done) {
            if let Some(episode) = self.episodes.get_mut(&category) {
                episode.retry_count += 1;
            }
            Some(policy.backoff.delay_for(retries_done))
        } else {
            None
        };

        debug!(
            category = %category,
            attempt,
            ?signal,
            retry = retry_after.is_some(),
            "Failure recorded"
        );

        FailureDecision {
            category,
            attempt,
            signal,
            retry_after,
        }
    }

    /// Record a failure that ends the category's attempts outright.
    ///
    /// The budget is left as is; Error fires unless this episode already
    /// raised it.
    pub fn record_terminal(
        &mut self,
        category: FailureCategory,
        policy: &RetryPolicy,
        error: &ApiError,
    ) -> FailureDecision {
        let episode = self
            .episodes
            .entry(category)
            .or_insert_with(|| FailureEpisode::new(category));
        episode.observe(&error.to_string());
        let attempt = episode.retry_count + 1;
        let signal = self.should_escalate(category, policy.max_retries, policy.max_retries);
        debug!(category = %category, attempt, ?signal, "Terminal failure recorded");
        FailureDecision {
            category,
            attempt,
            signal,
            retry_after: None,
        }
    }

    /// Clear the episode after a successful call in `category`. Idempotent.
    pub fn reset_episode(&mut self, category: FailureCategory) {
        if self.episodes.remove(&category).is_some() {
            debug!(category = %category, "Episode cleared");
        }
    }

    /// Clear every episode (full recovery).
    pub fn reset_all(&mut self) {
        self.episodes.clear();
    }

    pub fn episode(&self, category: FailureCategory) -> Option<&FailureEpisode> {
        self.episodes.get(&category)
    }

    /// Current level for `category`; `None` when no episode is open.
    pub fn level(&self, category: FailureCategory) -> EscalationLevel {
        self.episodes
            .get(&category)
            .map(|e| e.level)
            .unwrap_or_default()
    }

    pub fn retry_count(&self, category: FailureCategory) -> u32 {
        self.episodes
            .get(&category)
            .map(|e| e.retry_count)
            .unwrap_or(0)
    }

    pub fn episodes(&self) -> impl Iterator<Item = &FailureEpisode> {
        self.episodes.values()
    }

    pub fn has_open_episodes(&self) -> bool {
        !self.episodes.is_empty()
    }
}
