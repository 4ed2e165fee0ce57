//! Round orchestrator: one authoritative state machine per table.
//!
//! A [`TableOrchestrator`] owns every piece of mutable round state for its
//! table and is driven by a single event loop. Three sources feed the loop:
//!
//! ```text
//!   TableHandle ──commands / hardware events──┐
//!   TimerSet    ──timer firings───────────────┼──▶ select! loop ──▶ RoundMachine
//!   JoinSet     ──backend call completions────┘          │
//!                                                        ├──▶ EscalationManager
//!                                                        └──▶ HealthReporter (spawned)
//! ```
//!
//! Backend calls never run inline: they are spawned with a deadline and their
//! completions come back through the same loop, so a hung call cannot delay a
//! "no more bets" event. Completions and timer firings are tagged (epoch,
//! generation) and discarded once the table has moved on.

pub mod calls;
pub mod handle;
pub mod table;

pub use handle::{TableCommand, TableError, TableHandle};
pub use table::{Collaborators, TableOrchestrator};
