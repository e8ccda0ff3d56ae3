//! Typed error hierarchy for the compaction engine.
//!
//! Two enums cover the two failure surfaces:
//! - [`CompactionError`]: a compaction attempt that did not install a summary
//! - [`HistoryError`]: structural mistakes when building or editing history

use crate::history::RoundId;
use thiserror::Error;

/// Why a compaction attempt failed.
///
/// Every variant except [`NothingToSummarize`](CompactionError::NothingToSummarize)
/// is raised only after the attempt's telemetry event has been recorded.
/// The engine never retries locally; the caller decides whether to proceed
/// without compaction or abort the enclosing turn.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// No prior turns and at most one pending round. A contract violation
    /// detected before any rendering or network call.
    #[error("nothing to summarize: no prior turns and at most one pending round")]
    NothingToSummarize,

    #[error("summarization prompt exceeds the input budget ({used} > {budget} tokens)")]
    BudgetExceeded { used: usize, budget: usize },

    #[error("failed to render summarization prompt: {0}")]
    Render(String),

    #[error("summarization request failed: {0}")]
    RequestFailed(String),

    /// The endpoint answered with a non-success response type.
    #[error("summarization endpoint returned {kind}: {reason}")]
    Upstream { kind: String, reason: String },

    #[error("summary too large ({tokens} > {budget} tokens)")]
    TooLarge { tokens: usize, budget: usize },
}

impl CompactionError {
    /// Telemetry tag for this failure, or `None` for failures that are never
    /// reported.
    pub fn outcome_tag(&self) -> Option<&str> {
        match self {
            CompactionError::NothingToSummarize => None,
            CompactionError::BudgetExceeded { .. } => Some("budgetExceeded"),
            CompactionError::Render(_) => Some("renderError"),
            CompactionError::RequestFailed(_) => Some("requestFailed"),
            CompactionError::Upstream { kind, .. } => Some(kind),
            CompactionError::TooLarge { .. } => Some("tooLarge"),
        }
    }
}

/// Errors from building or editing a [`Conversation`](crate::history::Conversation).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("round {0} already exists in this conversation")]
    DuplicateRound(RoundId),

    #[error("round {0} is not part of this conversation")]
    UnknownRound(RoundId),
}
