//! Round State Machine: legal transition guard and transition log.
//!
//! The orchestrator calls `advance()` for every state change. Each call checks
//! the edge against the state graph and appends it to a bounded log that the
//! status channel and tests can inspect.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::round::types::{RoundId, RoundState};

/// Transitions kept in the log before the oldest are dropped.
const LOG_CAPACITY: usize = 256;

/// Legal transitions between round states.
///
/// ```text
/// Closed → Starting
/// Starting → Betting | Closed
/// Betting → BetStopped
/// BetStopped → AwaitingResult
/// AwaitingResult → Settling
/// Settling → Finishing
/// Finishing → Closed
/// Paused → Closed | Betting | BetStopped | AwaitingResult | Settling | Finishing
/// any (except Paused) → Paused
/// any (except Error) → Error
/// any (except Closed) → Closed          (close table / recovery)
/// ```
fn is_legal_transition(from: RoundState, to: RoundState) -> bool {
    use RoundState::*;

    if from == to {
        return false;
    }
    if to == Paused || to == Error || to == Closed {
        return true;
    }

    matches!(
        (from, to),
        (Closed, Starting)
            | (Starting, Betting)
            | (Betting, BetStopped)
            | (BetStopped, AwaitingResult)
            | (AwaitingResult, Settling)
            | (Settling, Finishing)
            // Resume into the state held before pausing
            | (Paused, Betting)
            | (Paused, BetStopped)
            | (Paused, AwaitingResult)
            | (Paused, Settling)
            | (Paused, Finishing)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RoundState,
    pub to: RoundState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_id: Option<RoundId>,
    /// Milliseconds since the machine was created.
    pub elapsed_ms: u64,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: RoundState,
    pub to: RoundState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// The table's authoritative round state.
pub struct RoundMachine {
    current: RoundState,
    created_at: Instant,
    transitions: VecDeque<TransitionRecord>,
}

impl RoundMachine {
    /// Create a machine starting at `Closed`.
    pub fn new() -> Self {
        Self {
            current: RoundState::Closed,
            created_at: Instant::now(),
            transitions: VecDeque::new(),
        }
    }

    pub fn current(&self) -> RoundState {
        self.current
    }

    /// Attempt to move to `to`, recording the edge on success.
    pub fn advance(
        &mut self,
        to: RoundState,
        round_id: Option<&RoundId>,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            round_id: round_id.cloned(),
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            at: Utc::now(),
            reason: reason.map(String::from),
        };

        if self.transitions.len() == LOG_CAPACITY {
            self.transitions.pop_front();
        }
        self.transitions.push_back(record);
        self.current = to;
        Ok(())
    }

    pub fn transitions(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.transitions.iter()
    }

    pub fn last_transition(&self) -> Option<&TransitionRecord> {
        self.transitions.back()
    }

    /// Compact history, e.g. `Closed → Starting → Betting`.
    pub fn summary(&self) -> String {
        let mut states = vec![self
            .transitions
            .front()
            .map(|t| t.from)
            .unwrap_or(self.current)
            .to_string()];
        states.extend(self.transitions.iter().map(|t| t.to.to_string()));
        states.join(" → ")
    }
}

impl Default for RoundMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RoundState::*;

    #[test]
    fn test_initial_state() {
        let machine = RoundMachine::new();
        assert_eq!(machine.current(), Closed);
        assert_eq!(machine.transitions().count(), 0);
        assert_eq!(machine.summary(), "Closed");
    }

    #[test]
    fn test_happy_path() {
        let mut machine = RoundMachine::new();
        let round = RoundId::new("r-42");

        machine.advance(Starting, None, Some("open table")).unwrap();
        for to in [Betting, BetStopped, AwaitingResult, Settling, Finishing, Closed] {
            machine.advance(to, Some(&round), None).unwrap();
        }

        assert_eq!(machine.current(), Closed);
        assert_eq!(machine.transitions().count(), 7);
        assert_eq!(
            machine.summary(),
            "Closed → Starting → Betting → BetStopped → AwaitingResult → Settling → Finishing → Closed"
        );
        assert_eq!(machine.last_transition().unwrap().round_id, Some(round));
    }

    #[test]
    fn test_skipping_steps_is_illegal() {
        let mut machine = RoundMachine::new();
        let err = machine.advance(Betting, None, None).unwrap_err();
        assert_eq!(err, IllegalTransition { from: Closed, to: Betting });
        assert_eq!(err.to_string(), "Illegal state transition: Closed → Betting");

        machine.advance(Starting, None, None).unwrap();
        machine.advance(Betting, None, None).unwrap();
        assert!(machine.advance(Settling, None, None).is_err());
        assert_eq!(machine.current(), Betting);
    }

    #[test]
    fn test_pause_and_resume_into_held_state() {
        let mut machine = RoundMachine::new();
        machine.advance(Starting, None, None).unwrap();
        machine.advance(Betting, None, None).unwrap();
        machine.advance(BetStopped, None, None).unwrap();
        machine.advance(AwaitingResult, None, None).unwrap();
        machine.advance(Settling, None, None).unwrap();

        machine.advance(Paused, None, Some("conflict")).unwrap();
        assert!(machine.advance(Paused, None, None).is_err());
        machine.advance(Settling, None, Some("resumed")).unwrap();
        assert_eq!(machine.current(), Settling);
    }

    #[test]
    fn test_error_and_recovery() {
        let mut machine = RoundMachine::new();
        machine.advance(Error, None, Some("device fault")).unwrap();
        assert!(machine.advance(Error, None, None).is_err());
        assert!(machine.advance(Starting, None, None).is_err());
        machine.advance(Closed, None, Some("recovered")).unwrap();
        assert_eq!(machine.current(), Closed);
    }

    #[test]
    fn test_self_transition_rejected() {
        let mut machine = RoundMachine::new();
        assert!(machine.advance(Closed, None, None).is_err());
    }

    #[test]
    fn test_log_is_bounded() {
        let mut machine = RoundMachine::new();
        for _ in 0..(LOG_CAPACITY + 10) {
            machine.advance(Starting, None, None).unwrap();
            machine.advance(Closed, None, None).unwrap();
        }
        assert_eq!(machine.transitions().count(), LOG_CAPACITY);
    }

    #[test]
    fn test_transition_record_json() {
        let mut machine = RoundMachine::new();
        machine.advance(Starting, None, Some("open")).unwrap();
        let json = serde_json::to_string(machine.last_transition().unwrap()).unwrap();
        assert!(json.contains("\"from\":\"closed\""));
        assert!(json.contains("\"to\":\"starting\""));
        assert!(!json.contains("round_id"));
    }
}
