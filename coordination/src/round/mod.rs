//! Round: identifiers, lifecycle states and the legal-transition guard.
//!
//! ```text
//! Closed ─open─▶ Starting ─ok─▶ Betting ─deadline|no more bets─▶ BetStopped
//!    ▲              │                                               │
//!    │           failure                                        immediate
//!    │              ▼                                               ▼
//!    │           Closed (retry)                              AwaitingResult
//!    │                                                              │ result
//!    │                                                              ▼
//!    └──────── finish ok ◀── Finishing ◀── deal ok ◀──────────── Settling
//!
//! any ─conflict─▶ Paused ─marker cleared + resume─▶ held state
//! any ─exhausted|fatal|fault─▶ Error ─recover─▶ Closed
//! ```

pub mod machine;
pub mod types;

pub use machine::{IllegalTransition, RoundMachine, TransitionRecord};
pub use types::{BetDeadline, HardwareResult, ResultValue, RoundId, RoundState};
