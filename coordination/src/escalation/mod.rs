//! Escalation: at-most-once severity signalling per failure episode
//!
//! Decides, per failure category, whether a Warn or Error signal must go out
//! on the health channel. The module is pure: it never performs I/O and the
//! orchestrator is the only caller.
//!
//! # Episode ladder
//!
//! ```text
//! first failure ──▶ episode created (level = None)
//!     │
//!     ├─ retry_count <  max_retries → Warn   (sent once, level = Warned)
//!     ├─ retry_count >= max_retries → Error  (sent once, level = Errored)
//!     │
//!     ▼
//! next success in the same category ──▶ episode cleared
//! ```

pub mod manager;
pub mod state;

pub use manager::{EscalationManager, FailureDecision};
pub use state::{EscalationLevel, FailureCategory, FailureEpisode, Severity};
