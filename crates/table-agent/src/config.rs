//! Agent configuration: backend endpoints, health channel and tables.
//!
//! Loaded from `table-agent.toml`; anything missing falls back to
//! `TABLE_*` / `ROUND_*` environment variables and then to built-in defaults.
//!
//! ```toml
//! [backend]
//! base_url = "https://games.example.net/api/v1"
//!
//! [health]
//! url = "https://health.example.net/signals"
//!
//! [defaults]
//! result_wait_secs = 60
//!
//! [[tables]]
//! id = "R-01"
//! device = "10.0.4.21:7000"
//! game = "roulette"
//! auto_reopen = true
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use round_coordination::{OrchestratorConfig, TableId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no tables configured")]
    NoTables,
    #[error("table {0} is configured twice")]
    DuplicateTable(String),
    #[error("table {table}: {source}")]
    Orchestrator {
        table: String,
        #[source]
        source: round_coordination::ConfigError,
    },
}

/// Round API endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub connect_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("TABLE_BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:8080/api/v1".into()),
            api_key: std::env::var("TABLE_BACKEND_API_KEY").ok(),
            connect_timeout_ms: 2_000,
        }
    }
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Health/error reporting channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Signals are only logged when disabled
    pub enabled: bool,
    pub url: String,
    pub api_key: Option<String>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        let url = std::env::var("TABLE_HEALTH_URL").ok();
        Self {
            enabled: url.is_some(),
            url: url.unwrap_or_else(|| "http://localhost:8090/signals".into()),
            api_key: std::env::var("TABLE_HEALTH_API_KEY").ok(),
        }
    }
}

/// Game played on a table; decides how device results are parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    Roulette,
    Dice,
}

/// One physical table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub id: String,
    /// `host:port` of the device controller
    pub device: String,
    pub game: GameKind,
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_ms: u64,
    // Per-table overrides of [defaults]
    #[serde(default)]
    pub result_wait_secs: Option<u64>,
    #[serde(default)]
    pub notify_bet_stop: Option<bool>,
    #[serde(default)]
    pub auto_reopen: Option<bool>,
    #[serde(default)]
    pub auto_recover_after_secs: Option<u64>,
}

fn default_reconnect_ms() -> u64 {
    2_000
}

impl TableConfig {
    pub fn table_id(&self) -> TableId {
        TableId::new(&self.id)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }

    /// Apply this table's overrides on top of `defaults`.
    pub fn orchestrator_config(&self, defaults: &OrchestratorConfig) -> OrchestratorConfig {
        let mut config = defaults.clone();
        if let Some(secs) = self.result_wait_secs {
            config.result_wait_secs = secs;
        }
        if let Some(notify) = self.notify_bet_stop {
            config.notify_bet_stop = notify;
        }
        if let Some(reopen) = self.auto_reopen {
            config.auto_reopen = reopen;
        }
        if self.auto_recover_after_secs.is_some() {
            config.auto_recover_after_secs = self.auto_recover_after_secs;
        }
        config
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub backend: BackendConfig,
    pub health: HealthConfig,
    pub defaults: OrchestratorConfig,
    pub tables: Vec<TableConfig>,
}

impl AgentConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Invalid TOML")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tables.is_empty() {
            return Err(ConfigError::NoTables);
        }
        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.id.as_str()) {
                return Err(ConfigError::DuplicateTable(table.id.clone()));
            }
            table
                .orchestrator_config(&self.defaults)
                .validate()
                .map_err(|source| ConfigError::Orchestrator {
                    table: table.id.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Keep only the named tables; an empty selection keeps all.
    pub fn select_tables(&mut self, ids: &[String]) {
        if !ids.is_empty() {
            self.tables.retain(|t| ids.contains(&t.id));
        }
    }
}
