//! Table agent runtime.
//!
//! Connects the round-coordination core to the outside world: the game
//! backend over HTTP, the health channel, and each table's device controller
//! over a TCP line protocol.

pub mod agent;
pub mod api_client;
pub mod config;
pub mod hardware;
pub mod health;
pub mod telemetry;

pub use agent::{http_collaborators, Agent};
pub use api_client::HttpRoundApiClient;
pub use config::{AgentConfig, ConfigError, GameKind, TableConfig};
pub use hardware::{HardwareBridge, HardwareCommand, ProtocolError};
pub use health::{HttpHealthReporter, LogHealthReporter};
