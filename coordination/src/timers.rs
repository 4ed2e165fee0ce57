//! Cancellable timers that fire into a table's event queue.
//!
//! Each [`TimerKind`] has at most one armed timer. Re-arming or cancelling a
//! kind aborts the sleeping task and bumps the generation, and [`TimerSet::accept`]
//! rejects any firing whose generation is no longer current. A timeout that
//! raced with a state change therefore never reaches a newer round.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::escalation::FailureCategory;
use crate::round::RoundState;

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// End of the betting window.
    BetDeadline,
    /// Ceiling on waiting for the device result.
    ResultWait,
    /// Next poll of the backend pause marker.
    PausePoll,
    /// Backoff before retrying a failed call.
    Retry(FailureCategory),
    /// Automated Error → Closed recovery.
    Recovery,
}

impl TimerKind {
    /// Whether a timer of this kind may stay armed in `state`.
    pub fn valid_in(self, state: RoundState) -> bool {
        use RoundState::*;
        match self {
            Self::BetDeadline => state == Betting,
            Self::ResultWait => state == AwaitingResult,
            Self::PausePoll => state == Paused,
            Self::Recovery => state == Error,
            Self::Retry(FailureCategory::NoStart) => state == Closed,
            Self::Retry(FailureCategory::NoBetStop) => {
                matches!(state, BetStopped | AwaitingResult | Settling | Finishing)
            }
            Self::Retry(FailureCategory::NoDeal) => state == Settling,
            Self::Retry(FailureCategory::NoFinish) => state == Finishing,
            Self::Retry(FailureCategory::DeviceFault) => false,
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BetDeadline => write!(f, "bet_deadline"),
            Self::ResultWait => write!(f, "result_wait"),
            Self::PausePoll => write!(f, "pause_poll"),
            Self::Retry(category) => write!(f, "retry:{category}"),
            Self::Recovery => write!(f, "recovery"),
        }
    }
}

/// A timer firing as delivered to the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

/// Armed timers for one table.
pub struct TimerSet<M> {
    tx: mpsc::Sender<M>,
    next_generation: u64,
    armed: HashMap<TimerKind, (u64, JoinHandle<()>)>,
}

impl<M> TimerSet<M>
where
    M: From<TimerFired> + Send + 'static,
{
    pub fn new(tx: mpsc::Sender<M>) -> Self {
        Self {
            tx,
            next_generation: 0,
            armed: HashMap::new(),
        }
    }

    /// Arm `kind` to fire after `after`, replacing any timer of the same kind.
    pub fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.cancel(kind);
        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(M::from(TimerFired { kind, generation })).await;
        });
        trace!(timer = %kind, generation, after_ms = after.as_millis() as u64, "Timer armed");
        self.armed.insert(kind, (generation, handle));
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some((generation, handle)) = self.armed.remove(&kind) {
            handle.abort();
            trace!(timer = %kind, generation, "Timer cancelled");
        }
    }

    /// Cancel every timer not valid in `state`.
    pub fn retain_valid_in(&mut self, state: RoundState) {
        let stale: Vec<TimerKind> = self
            .armed
            .keys()
            .copied()
            .filter(|kind| !kind.valid_in(state))
            .collect();
        for kind in stale {
            self.cancel(kind);
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.armed.drain() {
            handle.abort();
        }
    }

    /// Consume a firing. Returns `false` for a timer that was cancelled or
    /// replaced after it was scheduled.
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        match self.armed.get(&fired.kind) {
            Some((generation, _)) if *generation == fired.generation => {
                self.armed.remove(&fired.kind);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }
}

impl<M> Drop for TimerSet<M> {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.armed.drain() {
            handle.abort();
        }
    }
}
