//! Round Coordination Library
//!
//! This library provides the round-lifecycle core for live table games
//! (roulette wheels, dice shakers) driven by a remote game backend:
//! - A per-table orchestrator that owns the round state machine
//! - An escalation manager that turns failure streaks into Warn/Error signals
//! - Cancellable timers, deadlines and retry backoff
//!
//! # Features
//!
//! ## Orchestration
//! - `TableOrchestrator`: one event loop per table, fed by hardware events,
//!   timer firings and backend-call completions
//! - `TableHandle`: cloneable handle for commands, hardware delivery and status
//!
//! ## Escalation
//! - `EscalationManager`: I/O-free Warn/Error decisions, at most one of each
//!   per failure episode
//!
//! ## Collaborators
//! - `RoundApiClient`, `HealthReporter`, `Alerter`: traits implemented by the
//!   transport layer (see the `table-agent` crate)
//!
//! # Usage
//!
//! ```ignore
//! let (orchestrator, handle) =
//!     TableOrchestrator::new(TableId::new("R-01"), OrchestratorConfig::default(), collaborators);
//! orchestrator.spawn();
//! handle.open_table().await?;
//! handle.report_hardware(HardwareEvent::BetStopSignal).await?;
//! ```

pub mod config;
pub mod contracts;
pub mod escalation;
pub mod events;
pub mod orchestrator;
pub mod resilience;
pub mod round;
pub mod timers;

// Re-export collaborator contracts
pub use contracts::{
    Alerter, ApiError, HardwareEvent, HealthReporter, HealthSignal, LogAlerter, RoundApiClient,
    RoundPayload, RoundStart, TableId,
};

// Re-export configuration types
pub use config::{ConfigError, OrchestratorConfig, RetryPolicies};

// Re-export escalation types
pub use escalation::{
    EscalationLevel, EscalationManager, FailureCategory, FailureDecision, FailureEpisode, Severity,
};

// Re-export event types
pub use events::{EventBus, EventBusExt, EventFilter, SharedEventBus, TableEvent, TableStatus};

// Re-export orchestrator types
pub use orchestrator::{Collaborators, TableCommand, TableError, TableHandle, TableOrchestrator};

// Re-export resilience types
pub use resilience::{with_deadline, BackoffSchedule, RetryPolicy};

// Re-export round types
pub use round::{
    BetDeadline, HardwareResult, ResultValue, RoundId, RoundMachine, RoundState, TransitionRecord,
};

// Re-export timer types
pub use timers::{TimerFired, TimerKind, TimerSet};
