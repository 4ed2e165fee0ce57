//! Tracing setup and the table event log.

use round_coordination::{SharedEventBus, TableEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over the `info` default.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Log every event published on `bus` until cancelled.
pub async fn log_events(bus: SharedEventBus, cancel: CancellationToken) {
    let mut rx = bus.subscribe();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &TableEvent) {
    let table = event.table_id();
    match event {
        // Transitions are already logged by the orchestrator itself.
        TableEvent::StateChanged { .. } => {}
        TableEvent::RoundOpened {
            round_id,
            bet_deadline,
            ..
        } => info!(table = %table, round = %round_id, deadline = %bet_deadline, "Round opened"),
        TableEvent::SignalRaised {
            category,
            severity,
            attempt,
            ..
        } => error!(
            table = %table,
            category = %category,
            severity = %severity,
            attempt,
            "Health signal raised"
        ),
        TableEvent::CallFailed { call, error, .. } => {
            debug!(table = %table, call = %call, "Backend call failed: {error}")
        }
        TableEvent::ResultDropped { reason, .. } => {
            debug!(table = %table, "Hardware result dropped: {reason}")
        }
    }
}
