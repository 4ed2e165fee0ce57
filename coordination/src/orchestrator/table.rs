//! Per-table event loop.
//!
//! The orchestrator is the only owner of the table's [`RoundMachine`],
//! [`EscalationManager`], active round and timers. Nothing here blocks on
//! I/O: backend calls run in `in_flight`, health signals and alerts run in
//! `side_tasks`, and both report back through the `select!` loop in
//! [`TableOrchestrator::run`].

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};

use crate::config::OrchestratorConfig;
use crate::contracts::{
    Alerter, ApiError, HardwareEvent, HealthReporter, HealthSignal, LogAlerter, RoundApiClient,
    RoundStart, TableId,
};
use crate::escalation::{EscalationManager, FailureCategory, FailureDecision, Severity};
use crate::events::{EventBus, SharedEventBus, TableEvent, TableStatus};
use crate::orchestrator::calls::{BackendCall, CallOutcome};
use crate::orchestrator::handle::{TableCommand, TableHandle, TableMessage};
use crate::resilience::with_deadline;
use crate::round::{BetDeadline, HardwareResult, ResultValue, RoundId, RoundMachine, RoundState};
use crate::timers::{TimerFired, TimerKind, TimerSet};

/// External services a table talks to, injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub api: Arc<dyn RoundApiClient>,
    pub health: Arc<dyn HealthReporter>,
    pub alerter: Arc<dyn Alerter>,
}

impl Collaborators {
    /// Collaborators with log-only operator alerts.
    pub fn new(api: Arc<dyn RoundApiClient>, health: Arc<dyn HealthReporter>) -> Self {
        Self {
            api,
            health,
            alerter: Arc::new(LogAlerter),
        }
    }

    pub fn with_alerter(mut self, alerter: Arc<dyn Alerter>) -> Self {
        self.alerter = alerter;
        self
    }
}

#[derive(Debug)]
struct ActiveRound {
    round_id: RoundId,
    bet_deadline: BetDeadline,
    result: Option<ResultValue>,
}

/// Where to go once a backend pause clears.
#[derive(Debug)]
struct PauseContext {
    resume_to: RoundState,
    conflict: FailureCategory,
}

/// Round lifecycle orchestrator for a single table.
pub struct TableOrchestrator {
    table_id: TableId,
    config: OrchestratorConfig,
    collaborators: Collaborators,
    machine: RoundMachine,
    escalation: EscalationManager,
    round: Option<ActiveRound>,
    pause: Option<PauseContext>,
    /// "No more bets" seen while a start was outstanding
    pending_bet_stop: bool,
    /// Bumped when a table is closed; completions from older epochs are dropped
    epoch: u64,
    inbox: mpsc::Receiver<TableMessage>,
    timers: TimerSet<TimerFired>,
    timer_rx: mpsc::Receiver<TimerFired>,
    in_flight: JoinSet<(u64, CallOutcome)>,
    side_tasks: JoinSet<()>,
    bus: SharedEventBus,
    status_tx: watch::Sender<TableStatus>,
    round_tx: watch::Sender<Option<RoundId>>,
}

impl TableOrchestrator {
    /// Build an orchestrator and the handle used to drive it.
    pub fn new(
        table_id: TableId,
        config: OrchestratorConfig,
        collaborators: Collaborators,
    ) -> (Self, TableHandle) {
        Self::with_bus(table_id, config, collaborators, EventBus::new().shared())
    }

    /// Like [`TableOrchestrator::new`], publishing onto a shared bus.
    pub fn with_bus(
        table_id: TableId,
        config: OrchestratorConfig,
        collaborators: Collaborators,
        bus: SharedEventBus,
    ) -> (Self, TableHandle) {
        let capacity = config.queue_capacity.max(1);
        let (sender, inbox) = mpsc::channel(capacity);
        let (timer_tx, timer_rx) = mpsc::channel(capacity);
        let (status_tx, status_rx) = watch::channel(TableStatus::new(table_id.clone()));
        let (round_tx, round_rx) = watch::channel(None);

        let handle = TableHandle::new(
            table_id.clone(),
            sender,
            status_rx,
            round_rx,
            Arc::clone(&bus),
        );

        let orchestrator = Self {
            table_id,
            config,
            collaborators,
            machine: RoundMachine::new(),
            escalation: EscalationManager::new(),
            round: None,
            pause: None,
            pending_bet_stop: false,
            epoch: 0,
            inbox,
            timers: TimerSet::new(timer_tx),
            timer_rx,
            in_flight: JoinSet::new(),
            side_tasks: JoinSet::new(),
            bus,
            status_tx,
            round_tx,
        };
        (orchestrator, handle)
    }

    /// Run the event loop on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Consume events until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!(table = %self.table_id, "Table orchestrator started");
        self.publish_status();

        loop {
            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(message) => {
                        if !self.on_message(message) {
                            break;
                        }
                    }
                    None => {
                        debug!(table = %self.table_id, "All handles dropped");
                        self.close("all handles dropped");
                        break;
                    }
                },
                Some(fired) = self.timer_rx.recv() => self.on_timer(fired),
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    match joined {
                        Ok((epoch, outcome)) => self.on_call_completed(epoch, outcome),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => error!(table = %self.table_id, "Backend call task failed: {e}"),
                    }
                }
                Some(joined) = self.side_tasks.join_next(), if !self.side_tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(table = %self.table_id, "Side task failed: {e}");
                    }
                }
            }
        }

        // Signals already raised still go out; each send has its own deadline.
        while self.side_tasks.join_next().await.is_some() {}
        info!(table = %self.table_id, "Table orchestrator stopped");
    }

    // ── inbound messages ────────────────────────────────────────────────

    /// Returns `false` when the loop should stop.
    fn on_message(&mut self, message: TableMessage) -> bool {
        match message {
            TableMessage::Command(command) => {
                debug!(table = %self.table_id, ?command, "Command received");
                match command {
                    TableCommand::Open => self.open(),
                    TableCommand::Close => self.close("closed by operator"),
                    TableCommand::Recover => self.recover("operator recovery"),
                    TableCommand::Shutdown => {
                        self.close("shutdown");
                        return false;
                    }
                }
            }
            TableMessage::Hardware { event, captured_in } => {
                debug!(
                    table = %self.table_id,
                    event = event.name(),
                    captured_in = ?captured_in,
                    "Hardware event"
                );
                match event {
                    HardwareEvent::BetStopSignal => self.on_bet_stop_signal(),
                    HardwareEvent::ResultReported { value } => {
                        self.on_result(HardwareResult::new(captured_in, value))
                    }
                    HardwareEvent::DeviceFault { code } => self.on_device_fault(&code),
                }
            }
        }
        true
    }

    fn open(&mut self) {
        let state = self.machine.current();
        if state != RoundState::Closed {
            warn!(table = %self.table_id, state = %state, "Open ignored: table is not closed");
            return;
        }
        self.timers.cancel(TimerKind::Retry(FailureCategory::NoStart));
        // An operator open starts a fresh budget even if the last one ran out.
        self.escalation.reset_episode(FailureCategory::NoStart);
        self.start_round("open table");
    }

    fn close(&mut self, reason: &str) {
        if let Some(round) = &self.round {
            warn!(table = %self.table_id, round = %round.round_id, reason, "Abandoning active round");
        }
        self.abandon_session();
        if self.machine.current() != RoundState::Closed {
            self.transition(RoundState::Closed, reason);
        } else {
            self.publish_status();
        }
    }

    fn recover(&mut self, reason: &str) {
        let state = self.machine.current();
        if !matches!(state, RoundState::Error | RoundState::Closed) {
            warn!(table = %self.table_id, state = %state, "Recovery ignored outside Error");
            return;
        }
        self.abandon_session();
        self.escalation.reset_all();
        if state == RoundState::Error {
            self.transition(RoundState::Closed, reason);
        } else {
            self.publish_status();
        }
        info!(table = %self.table_id, reason, "Table recovered");
    }

    /// Drop everything tied to the current session: timers, calls, round.
    fn abandon_session(&mut self) {
        self.timers.cancel_all();
        self.in_flight.abort_all();
        self.epoch += 1;
        self.round = None;
        self.pause = None;
        self.pending_bet_stop = false;
    }

    fn on_bet_stop_signal(&mut self) {
        let state = self.machine.current();
        match state {
            RoundState::Betting => self.stop_betting("device closed betting"),
            RoundState::Starting => {
                self.pending_bet_stop = true;
                info!(table = %self.table_id, "Bet stop recorded while round start is outstanding");
            }
            RoundState::Closed if self.timers.is_armed(TimerKind::Retry(FailureCategory::NoStart)) => {
                self.pending_bet_stop = true;
                info!(table = %self.table_id, "Bet stop recorded while round start is retrying");
            }
            RoundState::Paused => {
                if let Some(pause) = self.pause.as_mut() {
                    if pause.resume_to == RoundState::Betting {
                        pause.resume_to = RoundState::BetStopped;
                        info!(table = %self.table_id, "Bet stop recorded while paused");
                    }
                }
            }
            _ => debug!(table = %self.table_id, state = %state, "Bet stop ignored"),
        }
    }

    fn on_result(&mut self, result: HardwareResult) {
        let state = self.machine.current();
        let accepted = state == RoundState::AwaitingResult
            && result.matches(self.round.as_ref().map(|r| &r.round_id));

        if !accepted {
            let reason = if state != RoundState::AwaitingResult {
                format!("not awaiting a result ({state})")
            } else {
                "tagged for a different round".to_string()
            };
            debug!(
                table = %self.table_id,
                result = %result.value,
                tagged = ?result.round_id,
                reason = %reason,
                "Result dropped"
            );
            self.bus.publish(TableEvent::ResultDropped {
                table_id: self.table_id.clone(),
                value: result.value,
                tagged: result.round_id,
                reason,
                timestamp: Utc::now(),
            });
            return;
        }

        let Some(round) = self.round.as_mut() else {
            return;
        };
        round.result = Some(result.value.clone());
        let round_id = round.round_id.clone();
        info!(table = %self.table_id, round = %round_id, result = %result.value, "Result captured");

        if self.transition(RoundState::Settling, "result captured") {
            self.dispatch(BackendCall::Deal {
                round_id,
                result: result.value,
            });
        }
    }

    fn on_device_fault(&mut self, code: &str) {
        error!(table = %self.table_id, code, "Device fault");
        let error = ApiError::Transient(format!("device fault {code}"));
        self.record_failure(FailureCategory::DeviceFault, "device", &error);
        self.enter_error(&format!("device fault {code}"));
    }

    // ── timers ──────────────────────────────────────────────────────────

    fn arm(&mut self, kind: TimerKind, after: std::time::Duration) {
        let state = self.machine.current();
        if kind.valid_in(state) {
            self.timers.arm(kind, after);
        } else {
            debug!(table = %self.table_id, timer = %kind, state = %state, "Timer not armed in this state");
        }
    }

    fn on_timer(&mut self, fired: TimerFired) {
        if !self.timers.accept(fired) {
            trace!(table = %self.table_id, timer = %fired.kind, "Stale timer ignored");
            return;
        }
        let state = self.machine.current();
        if !fired.kind.valid_in(state) {
            debug!(table = %self.table_id, timer = %fired.kind, state = %state, "Timer no longer applies");
            return;
        }

        match fired.kind {
            TimerKind::BetDeadline => self.stop_betting("bet deadline elapsed"),
            TimerKind::ResultWait => {
                let error = ApiError::Transient(format!(
                    "no result within {}s",
                    self.config.result_wait_secs
                ));
                self.record_terminal_failure(FailureCategory::NoDeal, "result_wait", &error);
                self.enter_error("no result from device");
            }
            TimerKind::PausePoll => self.dispatch(BackendCall::PauseStatus),
            TimerKind::Recovery => self.recover("automatic recovery"),
            TimerKind::Retry(FailureCategory::NoStart) => self.start_round("retry round start"),
            TimerKind::Retry(FailureCategory::NoBetStop) => {
                if let Some(round_id) = self.active_round_id() {
                    self.dispatch(BackendCall::StopBet { round_id });
                }
            }
            TimerKind::Retry(FailureCategory::NoDeal) => self.deal(),
            TimerKind::Retry(FailureCategory::NoFinish) => {
                if let Some(round_id) = self.active_round_id() {
                    self.dispatch(BackendCall::Finish { round_id });
                }
            }
            TimerKind::Retry(FailureCategory::DeviceFault) => {}
        }
    }

    // ── round steps ─────────────────────────────────────────────────────

    fn start_round(&mut self, reason: &str) {
        if self.transition(RoundState::Starting, reason) {
            self.dispatch(BackendCall::Start);
        }
    }

    fn stop_betting(&mut self, reason: &str) {
        let Some(round_id) = self.active_round_id() else {
            warn!(table = %self.table_id, "Bet stop without an active round");
            return;
        };
        if !self.transition(RoundState::BetStopped, reason) {
            return;
        }
        if self.config.notify_bet_stop {
            self.dispatch(BackendCall::StopBet { round_id });
        }
        self.await_result("betting closed");
    }

    fn await_result(&mut self, reason: &str) {
        if self.transition(RoundState::AwaitingResult, reason) {
            self.arm(TimerKind::ResultWait, self.config.result_wait());
        }
    }

    fn deal(&mut self) {
        let Some(round) = &self.round else {
            return;
        };
        let Some(result) = round.result.clone() else {
            warn!(table = %self.table_id, round = %round.round_id, "Deal without a captured result");
            return;
        };
        let round_id = round.round_id.clone();
        self.dispatch(BackendCall::Deal { round_id, result });
    }

    fn finish(&mut self, reason: &str) {
        let Some(round_id) = self.active_round_id() else {
            return;
        };
        if self.transition(RoundState::Finishing, reason) {
            self.dispatch(BackendCall::Finish { round_id });
        }
    }

    fn enter_error(&mut self, reason: &str) {
        if self.machine.current() == RoundState::Error {
            return;
        }
        self.pause = None;
        if self.transition(RoundState::Error, reason) {
            if let Some(after) = self.config.auto_recover_after() {
                self.arm(TimerKind::Recovery, after);
            }
        }
    }

    // ── backend calls ───────────────────────────────────────────────────

    fn dispatch(&mut self, call: BackendCall) {
        debug!(table = %self.table_id, call = call.name(), epoch = self.epoch, "Dispatching backend call");
        let api = Arc::clone(&self.collaborators.api);
        let table = self.table_id.clone();
        let deadline = self.config.call_timeout();
        let epoch = self.epoch;
        self.in_flight
            .spawn(async move { (epoch, call.execute(api, table, deadline).await) });
    }

    fn on_call_completed(&mut self, epoch: u64, outcome: CallOutcome) {
        if epoch != self.epoch {
            debug!(table = %self.table_id, epoch, current = self.epoch, "Discarding completion from a closed session");
            return;
        }
        match outcome {
            CallOutcome::Start(result) => self.on_start_completed(result),
            CallOutcome::StopBet { round_id, result } => self.on_stop_bet_completed(&round_id, result),
            CallOutcome::Deal {
                round_id,
                value,
                result,
            } => self.on_deal_completed(&round_id, &value, result),
            CallOutcome::Finish { round_id, result } => self.on_finish_completed(&round_id, result),
            CallOutcome::Pause(result) => match result {
                Ok(()) => debug!(table = %self.table_id, "Backend acknowledged pause"),
                Err(e) => warn!(table = %self.table_id, "Pause request failed: {e}"),
            },
            CallOutcome::PauseStatus(result) => self.on_pause_status(result),
            CallOutcome::Resume(result) => self.on_resume_completed(result),
        }
    }

    fn on_start_completed(&mut self, result: Result<RoundStart, ApiError>) {
        if self.machine.current() != RoundState::Starting {
            debug!(table = %self.table_id, "Start completion ignored");
            return;
        }
        match result {
            Ok(start) => self.on_round_started(start),
            Err(ApiError::Conflict(detail)) => self.on_conflict(&BackendCall::Start, &detail),
            Err(error) => {
                self.transition(RoundState::Closed, "round start failed");
                let decision = self.record_failure(FailureCategory::NoStart, "start", &error);
                match decision.retry_after {
                    Some(delay) => {
                        info!(
                            table = %self.table_id,
                            attempt = decision.attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying round start"
                        );
                        self.arm(TimerKind::Retry(FailureCategory::NoStart), delay);
                    }
                    None => {
                        self.pending_bet_stop = false;
                        error!(table = %self.table_id, "Round start abandoned, waiting for operator");
                    }
                }
            }
        }
    }

    fn on_round_started(&mut self, start: RoundStart) {
        self.escalation.reset_episode(FailureCategory::NoStart);
        let RoundStart {
            round_id,
            bet_deadline,
        } = start;

        info!(table = %self.table_id, round = %round_id, deadline = %bet_deadline.at(), "Round opened");
        self.bus.publish(TableEvent::RoundOpened {
            table_id: self.table_id.clone(),
            round_id: round_id.clone(),
            bet_deadline: bet_deadline.at(),
            timestamp: Utc::now(),
        });
        self.round = Some(ActiveRound {
            round_id,
            bet_deadline,
            result: None,
        });

        if !self.transition(RoundState::Betting, "round started") {
            return;
        }
        if std::mem::take(&mut self.pending_bet_stop) {
            self.stop_betting("device closed betting before the round opened");
        } else if bet_deadline.has_elapsed() {
            self.stop_betting("bet deadline already elapsed");
        } else {
            self.arm(TimerKind::BetDeadline, bet_deadline.remaining());
        }
    }

    fn on_stop_bet_completed(&mut self, round_id: &RoundId, result: Result<(), ApiError>) {
        if !self.is_active(round_id) {
            debug!(table = %self.table_id, round = %round_id, "Stop-bet completion for an inactive round");
            return;
        }
        match result {
            Ok(()) => {
                debug!(table = %self.table_id, round = %round_id, "Bet stop acknowledged");
                self.escalation.reset_episode(FailureCategory::NoBetStop);
                self.publish_status();
            }
            Err(ApiError::Conflict(detail)) => {
                let state = self.machine.current();
                if matches!(state, RoundState::BetStopped | RoundState::AwaitingResult) {
                    let call = BackendCall::StopBet {
                        round_id: round_id.clone(),
                    };
                    self.on_conflict(&call, &detail);
                } else {
                    // The deal for this round is already under way.
                    warn!(
                        table = %self.table_id,
                        round = %round_id,
                        state = %state,
                        "Stop-bet conflict after the round moved on: {detail}"
                    );
                    self.bus.publish(TableEvent::CallFailed {
                        table_id: self.table_id.clone(),
                        call: "stop_bet".to_string(),
                        error: format!("conflict: {detail}"),
                        timestamp: Utc::now(),
                    });
                }
            }
            Err(error) => {
                // Local state has already moved on; only the acknowledgement retries.
                let decision = self.record_failure(FailureCategory::NoBetStop, "stop_bet", &error);
                if let Some(delay) = decision.retry_after {
                    self.arm(TimerKind::Retry(FailureCategory::NoBetStop), delay);
                }
            }
        }
    }

    fn on_deal_completed(&mut self, round_id: &RoundId, value: &ResultValue, result: Result<(), ApiError>) {
        if self.machine.current() != RoundState::Settling || !self.is_active(round_id) {
            debug!(table = %self.table_id, round = %round_id, "Deal completion ignored");
            return;
        }
        match result {
            Ok(()) => {
                info!(table = %self.table_id, round = %round_id, result = %value, "Result settled");
                self.escalation.reset_episode(FailureCategory::NoDeal);
                self.finish("result settled");
            }
            Err(ApiError::Conflict(detail)) => self.on_conflict(
                &BackendCall::Deal {
                    round_id: round_id.clone(),
                    result: value.clone(),
                },
                &detail,
            ),
            Err(error) => {
                let decision = self.record_failure(FailureCategory::NoDeal, "deal", &error);
                self.retry_or_fail(decision, &error);
            }
        }
    }

    fn on_finish_completed(&mut self, round_id: &RoundId, result: Result<(), ApiError>) {
        if self.machine.current() != RoundState::Finishing || !self.is_active(round_id) {
            debug!(table = %self.table_id, round = %round_id, "Finish completion ignored");
            return;
        }
        match result {
            Ok(()) => {
                info!(table = %self.table_id, round = %round_id, "Round finished");
                self.escalation.reset_all();
                self.round = None;
                self.transition(RoundState::Closed, "round finished");
                if self.config.auto_reopen {
                    self.start_round("auto reopen");
                }
            }
            Err(ApiError::Conflict(detail)) => self.on_conflict(
                &BackendCall::Finish {
                    round_id: round_id.clone(),
                },
                &detail,
            ),
            Err(error) => {
                let decision = self.record_failure(FailureCategory::NoFinish, "finish", &error);
                self.retry_or_fail(decision, &error);
            }
        }
    }

    /// Arm the category retry, or move to Error once no retry is left.
    fn retry_or_fail(&mut self, decision: FailureDecision, error: &ApiError) {
        match decision.retry_after {
            Some(delay) => self.arm(TimerKind::Retry(decision.category), delay),
            None => self.enter_error(&format!("{} failed: {error}", decision.category)),
        }
    }

    // ── pause handling ──────────────────────────────────────────────────

    fn on_conflict(&mut self, call: &BackendCall, detail: &str) {
        let Some(category) = call.category() else {
            warn!(table = %self.table_id, call = call.name(), "Conflict on a pause call: {detail}");
            return;
        };
        let state = self.machine.current();
        if state == RoundState::Paused {
            debug!(table = %self.table_id, call = call.name(), "Conflict while already paused");
            return;
        }
        let resume_to = match state {
            RoundState::Starting => RoundState::Closed,
            other => other,
        };
        warn!(
            table = %self.table_id,
            call = call.name(),
            state = %state,
            "Backend reports another open round: {detail}"
        );
        self.bus.publish(TableEvent::CallFailed {
            table_id: self.table_id.clone(),
            call: call.name().to_string(),
            error: format!("conflict: {detail}"),
            timestamp: Utc::now(),
        });

        let reason = format!("conflict on {}: {detail}", call.name());
        self.pause = Some(PauseContext {
            resume_to,
            conflict: category,
        });
        if !self.transition(RoundState::Paused, &reason) {
            self.pause = None;
            return;
        }

        self.alert(format!("table {} paused after {reason}", self.table_id));
        self.dispatch(BackendCall::Pause { reason });
        self.arm(TimerKind::PausePoll, self.config.pause_poll_interval());
    }

    fn on_pause_status(&mut self, result: Result<bool, ApiError>) {
        if self.machine.current() != RoundState::Paused {
            return;
        }
        match result {
            Ok(true) => {
                trace!(table = %self.table_id, "Backend still paused");
                self.arm(TimerKind::PausePoll, self.config.pause_poll_interval());
            }
            Ok(false) => {
                info!(table = %self.table_id, "Pause marker cleared, resuming");
                self.dispatch(BackendCall::Resume);
            }
            Err(e) => {
                warn!(table = %self.table_id, "Pause status poll failed: {e}");
                self.arm(TimerKind::PausePoll, self.config.pause_poll_interval());
            }
        }
    }

    fn on_resume_completed(&mut self, result: Result<(), ApiError>) {
        if self.machine.current() != RoundState::Paused {
            return;
        }
        match result {
            Ok(()) => self.resume_held_state(),
            Err(e) => {
                warn!(table = %self.table_id, "Resume failed: {e}");
                self.arm(TimerKind::PausePoll, self.config.pause_poll_interval());
            }
        }
    }

    fn resume_held_state(&mut self) {
        let pause = self.pause.take();
        if let Some(pause) = &pause {
            self.escalation.reset_episode(pause.conflict);
        }
        let mut target = pause.map_or(RoundState::Closed, |p| p.resume_to);
        if target.has_round() && self.round.is_none() {
            target = RoundState::Closed;
        }
        info!(table = %self.table_id, resume_to = %target, "Resuming after pause");

        match target {
            RoundState::Betting => {
                let Some(deadline) = self.round.as_ref().map(|r| r.bet_deadline) else {
                    return;
                };
                if !self.transition(RoundState::Betting, "resumed") {
                    return;
                }
                if deadline.has_elapsed() {
                    self.stop_betting("bet deadline elapsed while paused");
                } else {
                    self.arm(TimerKind::BetDeadline, deadline.remaining());
                }
            }
            RoundState::BetStopped => self.stop_betting("resumed after bet stop"),
            RoundState::AwaitingResult => self.await_result("resumed"),
            RoundState::Settling => {
                let has_result = self.round.as_ref().is_some_and(|r| r.result.is_some());
                if !has_result {
                    self.await_result("resumed without a captured result");
                } else if self.transition(RoundState::Settling, "resumed") {
                    self.deal();
                }
            }
            RoundState::Finishing => self.finish("resumed"),
            RoundState::Error => self.enter_error("resumed into error"),
            _ => {
                self.round = None;
                self.transition(RoundState::Closed, "resumed");
            }
        }
    }

    // ── escalation and side channels ────────────────────────────────────

    fn record_failure(
        &mut self,
        category: FailureCategory,
        call: &str,
        error: &ApiError,
    ) -> FailureDecision {
        self.log_failure(category, call, error);
        let decision =
            self.escalation
                .record_failure(category, self.config.policy(category), error);
        self.escalate(&decision, error);
        decision
    }

    /// Record a failure that gives up on `category` without spending its
    /// retry budget.
    fn record_terminal_failure(&mut self, category: FailureCategory, call: &str, error: &ApiError) {
        self.log_failure(category, call, error);
        let decision =
            self.escalation
                .record_terminal(category, self.config.policy(category), error);
        self.escalate(&decision, error);
    }

    fn log_failure(&self, category: FailureCategory, call: &str, error: &ApiError) {
        warn!(
            table = %self.table_id,
            call,
            category = %category,
            kind = error.kind(),
            "Call failed: {error}"
        );
        self.bus.publish(TableEvent::CallFailed {
            table_id: self.table_id.clone(),
            call: call.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn escalate(&mut self, decision: &FailureDecision, error: &ApiError) {
        if let Some(severity) = decision.signal {
            self.raise_signal(decision.category, severity, decision.attempt, &error.to_string());
        }
        self.publish_status();
    }

    fn raise_signal(&mut self, category: FailureCategory, severity: Severity, attempt: u32, detail: &str) {
        let state = self.machine.current();
        let content = format!("{category} on attempt {attempt}: {detail}");
        match severity {
            Severity::Warn => warn!(table = %self.table_id, category = %category, attempt, "Escalating warn: {content}"),
            Severity::Error => error!(table = %self.table_id, category = %category, attempt, "Escalating error: {content}"),
        }

        let mut signal = HealthSignal::new(self.table_id.clone(), category, severity, content)
            .with_metadata("attempt", attempt)
            .with_metadata("state", state.to_string());
        if let Some(round) = &self.round {
            signal = signal.with_metadata("round_id", round.round_id.as_str());
        }

        self.bus.publish(TableEvent::SignalRaised {
            table_id: self.table_id.clone(),
            category,
            severity,
            attempt,
            timestamp: Utc::now(),
        });

        let health = Arc::clone(&self.collaborators.health);
        let deadline = self.config.call_timeout();
        let table = self.table_id.clone();
        self.side_tasks.spawn(async move {
            // Never re-escalated.
            if let Err(e) = with_deadline(deadline, health.send_signal(signal)).await {
                warn!(table = %table, severity = %severity, "Health signal not delivered: {e}");
            }
        });
    }

    fn alert(&mut self, message: String) {
        let alerter = Arc::clone(&self.collaborators.alerter);
        let table = self.table_id.clone();
        self.side_tasks
            .spawn(async move { alerter.alert(&table, &message).await });
    }

    // ── state bookkeeping ───────────────────────────────────────────────

    /// Apply a transition, drop timers that no longer apply, and publish.
    fn transition(&mut self, to: RoundState, reason: &str) -> bool {
        let from = self.machine.current();
        let round_id = self.active_round_id();
        if let Err(e) = self.machine.advance(to, round_id.as_ref(), Some(reason)) {
            warn!(table = %self.table_id, reason, "{e}");
            return false;
        }
        self.timers.retain_valid_in(to);

        info!(
            table = %self.table_id,
            from = %from,
            to = %to,
            round = ?round_id,
            reason,
            "Round state changed"
        );
        self.bus.publish(TableEvent::StateChanged {
            table_id: self.table_id.clone(),
            from,
            to,
            round_id,
            reason: Some(reason.to_string()),
            timestamp: Utc::now(),
        });
        self.publish_status();
        true
    }

    fn publish_status(&self) {
        let round_id = self.active_round_id();
        self.round_tx.send_if_modified(|current| {
            if *current != round_id {
                current.clone_from(&round_id);
                true
            } else {
                false
            }
        });
        self.status_tx.send_replace(TableStatus {
            table_id: self.table_id.clone(),
            state: self.machine.current(),
            round_id,
            episodes: self.escalation.episodes().cloned().collect(),
            updated_at: Utc::now(),
        });
    }

    fn active_round_id(&self) -> Option<RoundId> {
        self.round.as_ref().map(|r| r.round_id.clone())
    }

    fn is_active(&self, round_id: &RoundId) -> bool {
        self.round.as_ref().is_some_and(|r| &r.round_id == round_id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::contracts::RoundPayload;

    struct QuietApi;

    #[async_trait]
    impl RoundApiClient for QuietApi {
        async fn start(&self, _table: &TableId) -> Result<RoundStart, ApiError> {
            Err(ApiError::Fatal("not used".into()))
        }

        async fn stop_bet_or_deal(&self, _round: &RoundId, _payload: &RoundPayload) -> Result<(), ApiError> {
            Ok(())
        }

        async fn finish(&self, _round: &RoundId) -> Result<(), ApiError> {
            Ok(())
        }

        async fn pause(&self, _table: &TableId, _reason: &str) -> Result<(), ApiError> {
            Ok(())
        }

        async fn resume(&self, _table: &TableId) -> Result<(), ApiError> {
            Ok(())
        }

        async fn pause_status(&self, _table: &TableId) -> Result<bool, ApiError> {
            Ok(false)
        }
    }

    struct QuietHealth;

    #[async_trait]
    impl HealthReporter for QuietHealth {
        async fn send_signal(&self, _signal: HealthSignal) -> Result<(), ApiError> {
            Ok(())
        }
    }

    /// Orchestrator paused with Betting held, as a conflict during betting
    /// would leave it.
    fn paused_while_betting(bet_period: Duration) -> TableOrchestrator {
        let collaborators = Collaborators::new(Arc::new(QuietApi), Arc::new(QuietHealth));
        let (mut table, _handle) =
            TableOrchestrator::new(TableId::new("T-1"), OrchestratorConfig::default(), collaborators);

        assert!(table.transition(RoundState::Starting, "open"));
        table.on_round_started(RoundStart {
            round_id: RoundId::new("rnd-1"),
            bet_deadline: BetDeadline::after(bet_period),
        });
        assert_eq!(table.machine.current(), RoundState::Betting);
        assert!(table.timers.is_armed(TimerKind::BetDeadline));

        let call = BackendCall::StopBet {
            round_id: RoundId::new("rnd-1"),
        };
        table.on_conflict(&call, "another round is open");
        assert_eq!(table.machine.current(), RoundState::Paused);
        assert!(!table.timers.is_armed(TimerKind::BetDeadline));
        table
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_into_betting_rearms_deadline() {
        let mut table = paused_while_betting(Duration::from_secs(30));
        assert_eq!(table.pause.as_ref().map(|p| p.resume_to), Some(RoundState::Betting));

        table.resume_held_state();

        assert_eq!(table.machine.current(), RoundState::Betting);
        assert!(table.timers.is_armed(TimerKind::BetDeadline));
        assert!(table.pause.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_deadline_elapsed_stops_betting() {
        let mut table = paused_while_betting(Duration::from_secs(30));
        tokio::time::advance(Duration::from_secs(31)).await;

        table.resume_held_state();

        assert_eq!(table.machine.current(), RoundState::AwaitingResult);
        assert!(!table.timers.is_armed(TimerKind::BetDeadline));
        assert!(table.timers.is_armed(TimerKind::ResultWait));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bet_stop_while_paused_resumes_past_betting() {
        let mut table = paused_while_betting(Duration::from_secs(30));

        table.on_bet_stop_signal();
        assert_eq!(
            table.pause.as_ref().map(|p| p.resume_to),
            Some(RoundState::BetStopped)
        );

        table.resume_held_state();

        assert_eq!(table.machine.current(), RoundState::AwaitingResult);
        assert!(!table.timers.is_armed(TimerKind::BetDeadline));
        assert!(table.timers.is_armed(TimerKind::ResultWait));
    }
}
