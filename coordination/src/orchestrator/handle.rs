//! Handle used by everything outside the event loop to talk to a table.

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

use crate::contracts::{HardwareEvent, TableId};
use crate::events::{
    EventBusExt, EventFilter, FilteredReceiver, SharedEventBus, TableEvent, TableStatus,
};
use crate::round::{ResultValue, RoundId, RoundState};

#[derive(Debug, Error)]
pub enum TableError {
    #[error("table {0} is no longer running")]
    Closed(TableId),
}

/// Operator-level commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableCommand {
    /// Open the table: start a new round.
    Open,
    /// Close the table, abandoning any round in progress.
    Close,
    /// Clear every failure episode and return to Closed from Error.
    Recover,
    /// Close the table and stop its event loop.
    Shutdown,
}

/// Messages sent into the event loop from outside.
#[derive(Debug)]
pub(crate) enum TableMessage {
    Command(TableCommand),
    Hardware {
        event: HardwareEvent,
        /// Round that was active when the device captured the event
        captured_in: Option<RoundId>,
    },
}

/// Cloneable handle to a running table orchestrator.
#[derive(Clone)]
pub struct TableHandle {
    table_id: TableId,
    sender: mpsc::Sender<TableMessage>,
    status: watch::Receiver<TableStatus>,
    active_round: watch::Receiver<Option<RoundId>>,
    bus: SharedEventBus,
}

impl TableHandle {
    pub(crate) fn new(
        table_id: TableId,
        sender: mpsc::Sender<TableMessage>,
        status: watch::Receiver<TableStatus>,
        active_round: watch::Receiver<Option<RoundId>>,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            table_id,
            sender,
            status,
            active_round,
            bus,
        }
    }

    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    async fn send(&self, message: TableMessage) -> Result<(), TableError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| TableError::Closed(self.table_id.clone()))
    }

    pub async fn command(&self, command: TableCommand) -> Result<(), TableError> {
        self.send(TableMessage::Command(command)).await
    }

    pub async fn open_table(&self) -> Result<(), TableError> {
        self.command(TableCommand::Open).await
    }

    pub async fn close_table(&self) -> Result<(), TableError> {
        self.command(TableCommand::Close).await
    }

    pub async fn recover(&self) -> Result<(), TableError> {
        self.command(TableCommand::Recover).await
    }

    pub async fn shutdown(&self) -> Result<(), TableError> {
        self.command(TableCommand::Shutdown).await
    }

    /// Deliver a hardware event, tagged with the round active right now.
    pub async fn report_hardware(&self, event: HardwareEvent) -> Result<(), TableError> {
        let captured_in = self.active_round.borrow().clone();
        self.send(TableMessage::Hardware { event, captured_in }).await
    }

    /// Deliver a result captured during `round_id`.
    pub async fn report_result_for(
        &self,
        round_id: RoundId,
        value: ResultValue,
    ) -> Result<(), TableError> {
        self.send(TableMessage::Hardware {
            event: HardwareEvent::ResultReported { value },
            captured_in: Some(round_id),
        })
        .await
    }

    /// Latest status snapshot.
    pub fn status(&self) -> TableStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> RoundState {
        self.status.borrow().state
    }

    pub fn active_round(&self) -> Option<RoundId> {
        self.active_round.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<TableStatus> {
        self.status.clone()
    }

    /// Wait until the table reports `state`.
    pub async fn wait_for_state(&self, state: RoundState) -> Result<TableStatus, TableError> {
        let mut status = self.status.clone();
        let snapshot = status
            .wait_for(|s| s.state == state)
            .await
            .map_err(|_| TableError::Closed(self.table_id.clone()))?;
        Ok(snapshot.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TableEvent> {
        self.bus.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        self.bus.subscribe_filtered(filter)
    }
}
