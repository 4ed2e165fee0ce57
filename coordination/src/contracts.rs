//! Collaborator contracts consumed by the round orchestrator.
//!
//! The core never touches sockets, HTTP or device framing. It talks to three
//! injected collaborators through the traits below, and consumes hardware
//! input only as the closed [`HardwareEvent`] union.
//!
//! ## Outcome classification
//!
//! | Variant     | Retried | Escalation                     | Table effect         |
//! |-------------|---------|--------------------------------|----------------------|
//! | Transient   | yes     | Warn below budget, then Error  | stays on its path    |
//! | Conflict    | no      | none (alert only)              | → Paused             |
//! | Fatal       | no      | Error immediately              | per call, see below  |

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::escalation::{FailureCategory, Severity};
use crate::round::{BetDeadline, ResultValue, RoundId};

/// Identifier of a physical table as known to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(String);

impl TableId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classified failure of a backend or health-channel call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Another round is already open for this table.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Timeout, connection failure or 5xx-class response.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Malformed or unexpected response; retrying will not help.
    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl ApiError {
    /// Whether the failure may be retried under the category budget.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Conflict(_) => "conflict",
            Self::Transient(_) => "transient",
            Self::Fatal(_) => "fatal",
        }
    }
}

/// Successful reply to a `start` call.
#[derive(Debug, Clone)]
pub struct RoundStart {
    pub round_id: RoundId,
    pub bet_deadline: BetDeadline,
}

/// Body of a stop-bet or deal call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RoundPayload {
    /// Betting window closed on the table.
    StopBet,
    /// Winning result captured by the hardware.
    Deal { result: ResultValue },
}

/// The backend's round lifecycle API.
///
/// Transport, authentication and encoding are entirely the implementor's
/// concern. Every call is wrapped in a deadline by the orchestrator, so
/// implementations need not enforce their own.
#[async_trait]
pub trait RoundApiClient: Send + Sync {
    async fn start(&self, table: &TableId) -> Result<RoundStart, ApiError>;

    async fn stop_bet_or_deal(&self, round: &RoundId, payload: &RoundPayload)
        -> Result<(), ApiError>;

    async fn finish(&self, round: &RoundId) -> Result<(), ApiError>;

    async fn pause(&self, table: &TableId, reason: &str) -> Result<(), ApiError>;

    async fn resume(&self, table: &TableId) -> Result<(), ApiError>;

    /// Whether the backend still holds a pause marker for the table.
    async fn pause_status(&self, table: &TableId) -> Result<bool, ApiError>;
}

/// Severity signal delivered over the health channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSignal {
    pub table_id: TableId,
    pub category: FailureCategory,
    pub severity: Severity,
    pub content: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl HealthSignal {
    pub fn new(
        table_id: TableId,
        category: FailureCategory,
        severity: Severity,
        content: impl Into<String>,
    ) -> Self {
        Self {
            table_id,
            category,
            severity,
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Bidirectional device-status channel.
///
/// A failed send is logged by the caller and never escalated again.
#[async_trait]
pub trait HealthReporter: Send + Sync {
    async fn send_signal(&self, signal: HealthSignal) -> Result<(), ApiError>;
}

/// Operator alerting (chat-ops and similar). Delivery is best effort.
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn alert(&self, table: &TableId, message: &str);
}

/// Alerter that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn alert(&self, table: &TableId, message: &str) {
        tracing::warn!(table = %table, "Operator alert: {message}");
    }
}

/// Closed set of events the hardware channel adapter emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HardwareEvent {
    /// The device reports "no more bets".
    BetStopSignal,
    /// The device captured a result.
    ResultReported { value: ResultValue },
    /// The device reported a fault code.
    DeviceFault { code: String },
}

impl HardwareEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BetStopSignal => "bet_stop",
            Self::ResultReported { .. } => "result",
            Self::DeviceFault { .. } => "device_fault",
        }
    }
}
