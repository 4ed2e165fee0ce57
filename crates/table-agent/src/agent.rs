//! Process-level wiring: one orchestrator and one device bridge per table.

use std::sync::Arc;

use anyhow::{Context, Result};
use round_coordination::{
    Collaborators, EventBus, HealthReporter, RoundApiClient, SharedEventBus, TableHandle,
    TableOrchestrator,
};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api_client::HttpRoundApiClient;
use crate::config::AgentConfig;
use crate::hardware::HardwareBridge;
use crate::health::{HttpHealthReporter, LogHealthReporter};
use crate::telemetry;

/// Build the HTTP collaborators described by `config`.
pub fn http_collaborators(
    config: &AgentConfig,
) -> Result<(Arc<dyn RoundApiClient>, Arc<dyn HealthReporter>)> {
    let api = HttpRoundApiClient::new(&config.backend).context("Failed to build backend client")?;
    let health: Arc<dyn HealthReporter> = if config.health.enabled {
        Arc::new(
            HttpHealthReporter::new(&config.health)
                .context("Failed to build health reporter")?,
        )
    } else {
        info!("Health endpoint disabled, signals go to the log");
        Arc::new(LogHealthReporter)
    };
    Ok((Arc::new(api), health))
}

struct RunningTable {
    handle: TableHandle,
    task: JoinHandle<()>,
}

/// All tables of this process. Tables share collaborators and the event bus,
/// nothing else.
pub struct Agent {
    tables: Vec<RunningTable>,
    bus: SharedEventBus,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl Agent {
    /// Spawn every configured table. Must be called inside a tokio runtime.
    pub fn start(
        config: &AgentConfig,
        api: Arc<dyn RoundApiClient>,
        health: Arc<dyn HealthReporter>,
    ) -> Self {
        let bus = EventBus::new().shared();
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        tasks.spawn(telemetry::log_events(Arc::clone(&bus), cancel.clone()));

        let tables = config
            .tables
            .iter()
            .map(|table| {
                let collaborators = Collaborators::new(Arc::clone(&api), Arc::clone(&health));
                let (orchestrator, handle) = TableOrchestrator::with_bus(
                    table.table_id(),
                    table.orchestrator_config(&config.defaults),
                    collaborators,
                    Arc::clone(&bus),
                );
                let task = orchestrator.spawn();

                let bridge = HardwareBridge::new(handle.clone(), table);
                tasks.spawn(bridge.run(cancel.clone()));
                info!(table = %table.id, device = %table.device, game = ?table.game, "Table started");

                RunningTable { handle, task }
            })
            .collect();

        Self {
            tables,
            bus,
            cancel,
            tasks,
        }
    }

    pub fn handles(&self) -> impl Iterator<Item = &TableHandle> {
        self.tables.iter().map(|t| &t.handle)
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.bus
    }

    /// Ask every table to open its first round.
    pub async fn open_all(&self) -> Result<()> {
        for handle in self.handles() {
            handle
                .open_table()
                .await
                .with_context(|| format!("Failed to open table {}", handle.table_id()))?;
        }
        Ok(())
    }

    /// Stop bridges, close every table and wait for the loops to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();

        for table in &self.tables {
            if let Err(e) = table.handle.shutdown().await {
                warn!("Shutdown request not delivered: {e}");
            }
        }
        for table in self.tables {
            let id = table.handle.table_id().clone();
            drop(table.handle);
            if let Err(e) = table.task.await {
                warn!(table = %id, "Orchestrator task failed: {e}");
            }
        }
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Background task failed: {e}");
            }
        }
        info!("All tables stopped");
    }
}
