//! Hardware channel adapter: device line protocol and TCP bridge.
//!
//! The table controller speaks newline-terminated ASCII:
//!
//! ```text
//!   device → agent              agent → device
//!   BETSTOP                     OPEN    (betting lamp on)
//!   RESULT 17       roulette    CLOSE   (no more bets)
//!   RESULT 3,5,6    dice        IDLE    (no round)
//!   FAULT E12
//!   PING            ignored
//! ```
//!
//! Parsed lines become [`HardwareEvent`]s delivered through a [`TableHandle`];
//! state changes read from the handle's status watch become lamp commands.

use std::time::Duration;

use round_coordination::{HardwareEvent, ResultValue, RoundState, TableError, TableHandle};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{GameKind, TableConfig};

const ROULETTE_MAX: u8 = 36;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown message {0:?}")]
    Unknown(String),
    #[error("{0} without a value")]
    MissingValue(&'static str),
    #[error("invalid {game:?} result {raw:?}")]
    InvalidResult { game: GameKind, raw: String },
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("device i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Parse one device line. Heartbeats, comments and blank lines yield `None`.
pub fn parse_line(line: &str, game: GameKind) -> Result<Option<HardwareEvent>, ProtocolError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (keyword, rest) = match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    };

    match keyword.to_ascii_uppercase().as_str() {
        "PING" => Ok(None),
        "BETSTOP" => Ok(Some(HardwareEvent::BetStopSignal)),
        "RESULT" => {
            if rest.is_empty() {
                return Err(ProtocolError::MissingValue("RESULT"));
            }
            let value = parse_result(rest, game)?;
            Ok(Some(HardwareEvent::ResultReported { value }))
        }
        "FAULT" => {
            if rest.is_empty() {
                return Err(ProtocolError::MissingValue("FAULT"));
            }
            Ok(Some(HardwareEvent::DeviceFault {
                code: rest.to_string(),
            }))
        }
        _ => Err(ProtocolError::Unknown(line.to_string())),
    }
}

/// Parse the value part of a `RESULT` line for `game`.
pub fn parse_result(raw: &str, game: GameKind) -> Result<ResultValue, ProtocolError> {
    let invalid = || ProtocolError::InvalidResult {
        game,
        raw: raw.to_string(),
    };
    match game {
        GameKind::Roulette => {
            let number: u8 = raw.parse().map_err(|_| invalid())?;
            if number > ROULETTE_MAX {
                return Err(invalid());
            }
            Ok(ResultValue::Roulette { number })
        }
        GameKind::Dice => {
            let faces = raw
                .split(',')
                .map(|face| face.trim().parse::<u8>().ok().filter(|f| (1..=6).contains(f)))
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(invalid)?;
            Ok(ResultValue::Dice { faces })
        }
    }
}

/// Lamp command written back to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareCommand {
    OpenBetting,
    CloseBetting,
    Idle,
}

impl HardwareCommand {
    /// Command matching a table state; `None` while a round is being started.
    pub fn for_state(state: RoundState) -> Option<Self> {
        match state {
            RoundState::Betting => Some(Self::OpenBetting),
            RoundState::BetStopped
            | RoundState::AwaitingResult
            | RoundState::Settling
            | RoundState::Finishing => Some(Self::CloseBetting),
            RoundState::Closed | RoundState::Paused | RoundState::Error => Some(Self::Idle),
            RoundState::Starting => None,
        }
    }

    pub fn as_line(&self) -> &'static str {
        match self {
            Self::OpenBetting => "OPEN",
            Self::CloseBetting => "CLOSE",
            Self::Idle => "IDLE",
        }
    }
}

/// Connects one table's device controller to its orchestrator.
pub struct HardwareBridge {
    handle: TableHandle,
    device: String,
    game: GameKind,
    reconnect_delay: Duration,
}

impl HardwareBridge {
    pub fn new(handle: TableHandle, table: &TableConfig) -> Self {
        Self {
            handle,
            device: table.device.clone(),
            game: table.game,
            reconnect_delay: table.reconnect_delay(),
        }
    }

    /// Keep a TCP connection to the device open until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let table = self.handle.table_id().clone();
        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                connected = TcpStream::connect(&self.device) => connected,
            };

            match connected {
                Ok(stream) => {
                    info!(table = %table, device = %self.device, "Device connected");
                    let (reader, writer) = stream.into_split();
                    match self.serve(reader, writer, &cancel).await {
                        Ok(()) => info!(table = %table, "Device disconnected"),
                        Err(BridgeError::Table(e)) => {
                            warn!(table = %table, "Stopping device bridge: {e}");
                            break;
                        }
                        Err(e) => warn!(table = %table, "Device connection lost: {e}"),
                    }
                }
                Err(e) => warn!(table = %table, device = %self.device, "Device connect failed: {e}"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        debug!(table = %table, "Device bridge stopped");
    }

    /// Pump one established connection until EOF or cancellation.
    pub async fn serve<R, W>(
        &self,
        reader: R,
        mut writer: W,
        cancel: &CancellationToken,
    ) -> Result<(), BridgeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        let mut status = self.handle.status_receiver();
        let mut last = None;

        let state = status.borrow_and_update().state;
        self.sync_lamp(state, &mut last, &mut writer).await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                line = lines.next_line() => match line? {
                    Some(line) => self.on_line(&line).await?,
                    None => return Ok(()),
                },
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(TableError::Closed(self.handle.table_id().clone()).into());
                    }
                    let state = status.borrow_and_update().state;
                    self.sync_lamp(state, &mut last, &mut writer).await?;
                }
            }
        }
    }

    async fn on_line(&self, line: &str) -> Result<(), TableError> {
        match parse_line(line, self.game) {
            Ok(Some(event)) => self.handle.report_hardware(event).await,
            Ok(None) => {
                trace!(table = %self.handle.table_id(), "Device heartbeat");
                Ok(())
            }
            Err(e) => {
                warn!(table = %self.handle.table_id(), "Malformed device line: {e}");
                Ok(())
            }
        }
    }

    async fn sync_lamp<W>(
        &self,
        state: RoundState,
        last: &mut Option<HardwareCommand>,
        writer: &mut W,
    ) -> Result<(), std::io::Error>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(command) = HardwareCommand::for_state(state) else {
            return Ok(());
        };
        if *last == Some(command) {
            return Ok(());
        }
        debug!(table = %self.handle.table_id(), command = command.as_line(), "Lamp command");
        writer.write_all(command.as_line().as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        *last = Some(command);
        Ok(())
    }
}
