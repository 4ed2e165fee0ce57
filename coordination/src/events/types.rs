//! Event and status types published by a table orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contracts::TableId;
use crate::escalation::{FailureCategory, FailureEpisode, Severity};
use crate::round::{ResultValue, RoundId, RoundState};

/// Everything a table orchestrator announces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TableEvent {
    /// The round state changed
    StateChanged {
        table_id: TableId,
        from: RoundState,
        to: RoundState,
        round_id: Option<RoundId>,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A round was opened by the backend
    RoundOpened {
        table_id: TableId,
        round_id: RoundId,
        bet_deadline: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// A severity signal was handed to the health reporter
    SignalRaised {
        table_id: TableId,
        category: FailureCategory,
        severity: Severity,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    /// A backend call failed
    CallFailed {
        table_id: TableId,
        call: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A hardware result was discarded without touching any episode
    ResultDropped {
        table_id: TableId,
        value: ResultValue,
        tagged: Option<RoundId>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl TableEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::RoundOpened { .. } => "round_opened",
            Self::SignalRaised { .. } => "signal_raised",
            Self::CallFailed { .. } => "call_failed",
            Self::ResultDropped { .. } => "result_dropped",
        }
    }

    pub fn table_id(&self) -> &TableId {
        match self {
            Self::StateChanged { table_id, .. }
            | Self::RoundOpened { table_id, .. }
            | Self::SignalRaised { table_id, .. }
            | Self::CallFailed { table_id, .. }
            | Self::ResultDropped { table_id, .. } => table_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::StateChanged { timestamp, .. }
            | Self::RoundOpened { timestamp, .. }
            | Self::SignalRaised { timestamp, .. }
            | Self::CallFailed { timestamp, .. }
            | Self::ResultDropped { timestamp, .. } => *timestamp,
        }
    }
}

/// Latest snapshot of a table, mirrored from the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStatus {
    pub table_id: TableId,
    pub state: RoundState,
    pub round_id: Option<RoundId>,
    pub episodes: Vec<FailureEpisode>,
    pub updated_at: DateTime<Utc>,
}

impl TableStatus {
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            state: RoundState::Closed,
            round_id: None,
            episodes: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn episode(&self, category: FailureCategory) -> Option<&FailureEpisode> {
        self.episodes.iter().find(|e| e.category == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let event = TableEvent::StateChanged {
            table_id: TableId::new("D-07"),
            from: RoundState::Closed,
            to: RoundState::Starting,
            round_id: None,
            reason: Some("open table".into()),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["table_id"], "D-07");
        assert_eq!(json["to"], "starting");
        assert_eq!(event.event_type(), "state_changed");
    }

    #[test]
    fn test_status_starts_closed() {
        let status = TableStatus::new(TableId::new("R-01"));
        assert_eq!(status.state, RoundState::Closed);
        assert!(status.round_id.is_none());
        assert!(status.episode(FailureCategory::NoStart).is_none());
    }
}
