//! Backend calls issued by the orchestrator and their typed outcomes.
//!
//! Every call runs as its own task under the configured deadline; the loop
//! only ever sees a finished [`CallOutcome`].

use std::sync::Arc;
use std::time::Duration;

use crate::contracts::{ApiError, RoundApiClient, RoundPayload, RoundStart, TableId};
use crate::escalation::FailureCategory;
use crate::resilience::with_deadline;
use crate::round::{ResultValue, RoundId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BackendCall {
    Start,
    StopBet { round_id: RoundId },
    Deal { round_id: RoundId, result: ResultValue },
    Finish { round_id: RoundId },
    Pause { reason: String },
    PauseStatus,
    Resume,
}

impl BackendCall {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::StopBet { .. } => "stop_bet",
            Self::Deal { .. } => "deal",
            Self::Finish { .. } => "finish",
            Self::Pause { .. } => "pause",
            Self::PauseStatus => "pause_status",
            Self::Resume => "resume",
        }
    }

    /// Failure category charged when this call fails. Pause-family calls
    /// are bookkeeping and carry no budget.
    pub(crate) fn category(&self) -> Option<FailureCategory> {
        match self {
            Self::Start => Some(FailureCategory::NoStart),
            Self::StopBet { .. } => Some(FailureCategory::NoBetStop),
            Self::Deal { .. } => Some(FailureCategory::NoDeal),
            Self::Finish { .. } => Some(FailureCategory::NoFinish),
            Self::Pause { .. } | Self::PauseStatus | Self::Resume => None,
        }
    }

    pub(crate) async fn execute(
        self,
        api: Arc<dyn RoundApiClient>,
        table: TableId,
        deadline: Duration,
    ) -> CallOutcome {
        match self {
            Self::Start => CallOutcome::Start(with_deadline(deadline, api.start(&table)).await),
            Self::StopBet { round_id } => {
                let result =
                    with_deadline(deadline, api.stop_bet_or_deal(&round_id, &RoundPayload::StopBet))
                        .await;
                CallOutcome::StopBet { round_id, result }
            }
            Self::Deal { round_id, result } => {
                let payload = RoundPayload::Deal {
                    result: result.clone(),
                };
                let outcome =
                    with_deadline(deadline, api.stop_bet_or_deal(&round_id, &payload)).await;
                CallOutcome::Deal {
                    round_id,
                    value: result,
                    result: outcome,
                }
            }
            Self::Finish { round_id } => {
                let result = with_deadline(deadline, api.finish(&round_id)).await;
                CallOutcome::Finish { round_id, result }
            }
            Self::Pause { reason } => {
                CallOutcome::Pause(with_deadline(deadline, api.pause(&table, &reason)).await)
            }
            Self::PauseStatus => {
                CallOutcome::PauseStatus(with_deadline(deadline, api.pause_status(&table)).await)
            }
            Self::Resume => CallOutcome::Resume(with_deadline(deadline, api.resume(&table)).await),
        }
    }
}

/// Finished backend call, delivered back into the event loop.
#[derive(Debug)]
pub(crate) enum CallOutcome {
    Start(Result<RoundStart, ApiError>),
    StopBet {
        round_id: RoundId,
        result: Result<(), ApiError>,
    },
    Deal {
        round_id: RoundId,
        value: ResultValue,
        result: Result<(), ApiError>,
    },
    Finish {
        round_id: RoundId,
        result: Result<(), ApiError>,
    },
    Pause(Result<(), ApiError>),
    PauseStatus(Result<bool, ApiError>),
    Resume(Result<(), ApiError>),
}
