//! Round data model.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Backend-assigned round identifier. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(String);

impl RoundId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a table. Exactly one per table, owned by its orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    /// No round open; ready to start one.
    Closed,
    /// `start` in flight.
    Starting,
    /// Bets accepted until the deadline or the device closes betting.
    Betting,
    /// Betting closed on the table.
    BetStopped,
    /// Waiting for the device to report the result.
    AwaitingResult,
    /// `deal` in flight with the captured result.
    Settling,
    /// `finish` in flight.
    Finishing,
    /// Backend reported a conflicting round; waiting for the pause to clear.
    Paused,
    /// Flagged for operator or automated recovery.
    Error,
}

impl RoundState {
    /// States in which a RoundId is in flight.
    pub fn has_round(self) -> bool {
        matches!(
            self,
            Self::Betting | Self::BetStopped | Self::AwaitingResult | Self::Settling | Self::Finishing
        )
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Starting => write!(f, "Starting"),
            Self::Betting => write!(f, "Betting"),
            Self::BetStopped => write!(f, "BetStopped"),
            Self::AwaitingResult => write!(f, "AwaitingResult"),
            Self::Settling => write!(f, "Settling"),
            Self::Finishing => write!(f, "Finishing"),
            Self::Paused => write!(f, "Paused"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// End of the betting window, fixed at round start.
///
/// Carries a monotonic instant for timers and a wall-clock stamp for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BetDeadline {
    instant: Instant,
    at: DateTime<Utc>,
}

impl BetDeadline {
    /// Deadline `period` from now, as reported by the backend at round start.
    pub fn after(period: Duration) -> Self {
        let wall = chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            instant: Instant::now() + period,
            at: Utc::now() + wall,
        }
    }

    pub fn instant(&self) -> Instant {
        self.instant
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    /// Time left before betting closes; zero once elapsed.
    pub fn remaining(&self) -> Duration {
        self.instant.saturating_duration_since(Instant::now())
    }

    pub fn has_elapsed(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Result value captured by the hardware.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum ResultValue {
    /// Winning pocket on a roulette wheel.
    Roulette { number: u8 },
    /// Faces shown by the dice shaker, in device order.
    Dice { faces: Vec<u8> },
}

impl fmt::Display for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Roulette { number } => write!(f, "roulette:{number}"),
            Self::Dice { faces } => {
                let faces: Vec<String> = faces.iter().map(u8::to_string).collect();
                write!(f, "dice:{}", faces.join(","))
            }
        }
    }
}

/// A captured result tagged with the round that was active at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareResult {
    pub round_id: Option<RoundId>,
    pub value: ResultValue,
}

impl HardwareResult {
    pub fn new(round_id: Option<RoundId>, value: ResultValue) -> Self {
        Self { round_id, value }
    }

    /// Whether this result belongs to `active`.
    pub fn matches(&self, active: Option<&RoundId>) -> bool {
        matches!((self.round_id.as_ref(), active), (Some(tag), Some(active)) if tag == active)
    }
}
