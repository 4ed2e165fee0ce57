//! Escalation State: failure categories, severities and per-category episodes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failure categories tracked independently per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// `start` did not open a round
    NoStart,
    /// Backend never acknowledged the closed betting window
    NoBetStop,
    /// `deal` did not settle the captured result
    NoDeal,
    /// `finish` did not close the round
    NoFinish,
    /// Hardware reported a fault
    DeviceFault,
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 5] = [
        Self::NoStart,
        Self::NoBetStop,
        Self::NoDeal,
        Self::NoFinish,
        Self::DeviceFault,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoStart => "no_start",
            Self::NoBetStop => "no_bet_stop",
            Self::NoDeal => "no_deal",
            Self::NoFinish => "no_finish",
            Self::DeviceFault => "device_fault",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal level sent on the health channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warn,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Highest severity already sent within an episode. Only ever increases.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    #[default]
    None,
    Warned,
    Errored,
}

/// One category's failure streak, from its first failure to its next success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEpisode {
    pub category: FailureCategory,
    /// Retries already performed in this episode
    pub retry_count: u32,
    pub level: EscalationLevel,
    /// Failures observed in this episode, including the first
    pub failures: u32,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_failure_at: DateTime<Utc>,
}

impl FailureEpisode {
    pub fn new(category: FailureCategory) -> Self {
        let now = Utc::now();
        Self {
            category,
            retry_count: 0,
            level: EscalationLevel::None,
            failures: 0,
            last_error: None,
            started_at: now,
            last_failure_at: now,
        }
    }

    /// Note one more failure in the streak.
    pub fn observe(&mut self, error: &str) {
        self.failures += 1;
        self.last_error = Some(error.to_string());
        self.last_failure_at = Utc::now();
    }

    pub fn summary(&self) -> String {
        format!(
            "category={} failures={} retries={} level={:?}",
            self.category, self.failures, self.retry_count, self.level
        )
    }
}
