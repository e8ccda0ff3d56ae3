//! The single outcome of a compaction attempt.
//!
//! A [`CompactionOutcome`] can only be obtained as part of a
//! [`ReportedOutcome`], and a `ReportedOutcome` can only be produced by
//! consuming an [`OutcomeRecorder`], which sends the telemetry event on the
//! way out. An attempt therefore reports exactly once before its result
//! reaches the caller.

use super::telemetry::{CompactionStats, TelemetryEvent, TelemetrySink};
use crate::error::CompactionError;
use crate::history::RoundId;
use std::time::Instant;

/// Tagged result of one compaction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    Success {
        summary: String,
        covered_round: RoundId,
    },
    BudgetExceeded {
        used: usize,
        budget: usize,
    },
    RenderError(String),
    RequestFailed(String),
    TooLarge {
        tokens: usize,
        budget: usize,
    },
    /// Non-success response from the endpoint. `kind` is the response
    /// classification tag.
    UpstreamFailure {
        kind: String,
        reason: String,
    },
}

impl CompactionOutcome {
    /// Telemetry tag.
    pub fn tag(&self) -> &str {
        match self {
            CompactionOutcome::Success { .. } => "success",
            CompactionOutcome::BudgetExceeded { .. } => "budgetExceeded",
            CompactionOutcome::RenderError(_) => "renderError",
            CompactionOutcome::RequestFailed(_) => "requestFailed",
            CompactionOutcome::TooLarge { .. } => "tooLarge",
            CompactionOutcome::UpstreamFailure { kind, .. } => kind,
        }
    }

    fn into_result(self) -> Result<(String, RoundId), CompactionError> {
        match self {
            CompactionOutcome::Success {
                summary,
                covered_round,
            } => Ok((summary, covered_round)),
            CompactionOutcome::BudgetExceeded { used, budget } => {
                Err(CompactionError::BudgetExceeded { used, budget })
            }
            CompactionOutcome::RenderError(e) => Err(CompactionError::Render(e)),
            CompactionOutcome::RequestFailed(e) => Err(CompactionError::RequestFailed(e)),
            CompactionOutcome::TooLarge { tokens, budget } => {
                Err(CompactionError::TooLarge { tokens, budget })
            }
            CompactionOutcome::UpstreamFailure { kind, reason } => {
                Err(CompactionError::Upstream { kind, reason })
            }
        }
    }
}

impl TryFrom<CompactionError> for CompactionOutcome {
    type Error = CompactionError;

    /// Fails for errors that never become a reported outcome.
    fn try_from(err: CompactionError) -> Result<Self, Self::Error> {
        Ok(match err {
            CompactionError::NothingToSummarize => return Err(err),
            CompactionError::BudgetExceeded { used, budget } => {
                CompactionOutcome::BudgetExceeded { used, budget }
            }
            CompactionError::Render(e) => CompactionOutcome::RenderError(e),
            CompactionError::RequestFailed(e) => CompactionOutcome::RequestFailed(e),
            CompactionError::Upstream { kind, reason } => {
                CompactionOutcome::UpstreamFailure { kind, reason }
            }
            CompactionError::TooLarge { tokens, budget } => {
                CompactionOutcome::TooLarge { tokens, budget }
            }
        })
    }
}

/// An outcome whose telemetry has been sent.
#[derive(Debug)]
#[must_use]
pub struct ReportedOutcome {
    outcome: Result<CompactionOutcome, CompactionError>,
}

impl ReportedOutcome {
    /// Summary text and covered round on success, the failure otherwise.
    pub fn into_result(self) -> Result<(String, RoundId), CompactionError> {
        self.outcome?.into_result()
    }
}

/// Collects what the telemetry event needs while an attempt runs.
pub struct OutcomeRecorder<'s> {
    sink: &'s dyn TelemetrySink,
    stats: CompactionStats,
    model: String,
    response_id: Option<String>,
    started: Instant,
}

impl<'s> OutcomeRecorder<'s> {
    pub fn new(
        sink: &'s dyn TelemetrySink,
        stats: CompactionStats,
        model: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            stats,
            model: model.into(),
            response_id: None,
            started: Instant::now(),
        }
    }

    /// Remember the response id once the endpoint has answered.
    pub fn set_response_id(&mut self, id: Option<String>) {
        self.response_id = id;
    }

    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    pub fn succeed(self, summary: String, covered_round: RoundId) -> ReportedOutcome {
        self.finish(CompactionOutcome::Success {
            summary,
            covered_round,
        })
    }

    pub fn fail(self, error: CompactionError) -> ReportedOutcome {
        match CompactionOutcome::try_from(error) {
            Ok(outcome) => self.finish(outcome),
            Err(error) => ReportedOutcome { outcome: Err(error) },
        }
    }

    fn finish(self, outcome: CompactionOutcome) -> ReportedOutcome {
        self.sink.send(TelemetryEvent::compaction(
            outcome.tag(),
            &self.stats,
            &self.model,
            self.response_id.as_deref(),
            self.started.elapsed(),
        ));
        ReportedOutcome {
            outcome: Ok(outcome),
        }
    }
}
