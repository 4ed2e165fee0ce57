use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use table_agent::{http_collaborators, telemetry, Agent, AgentConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "table-agent", about = "Round lifecycle agent for live game tables")]
struct Args {
    /// Path to the agent configuration
    #[arg(long, default_value = "table-agent.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Only run these table ids (repeatable)
    #[arg(long = "table")]
    tables: Vec<String>,

    /// Open every table right after startup
    #[arg(long)]
    open: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_tracing(args.json_logs);

    let mut config = AgentConfig::load(&args.config)?;
    config.select_tables(&args.tables);
    config.validate()?;

    if args.check {
        for table in &config.tables {
            info!(table = %table.id, device = %table.device, game = ?table.game, "Table configured");
        }
        info!(tables = config.tables.len(), "Configuration OK");
        return Ok(());
    }

    info!(
        backend = %config.backend.base_url,
        tables = config.tables.len(),
        "Table agent starting"
    );

    let (api, health) = http_collaborators(&config)?;
    let agent = Agent::start(&config, api, health);
    if args.open {
        agent.open_all().await?;
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, closing tables");
    agent.shutdown().await;
    Ok(())
}
