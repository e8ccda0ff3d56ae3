//! Assembles the bounded summarization input from a [`Selection`].
//!
//! History is walked newest to oldest. Rounds are collected until one that
//! already carries a summary is found; that summary stands in for it and
//! everything older, and the walk stops. The collected rounds are then
//! reversed so segments come out chronologically.
//!
//! The builder does not enforce any token budget. Budgets are applied by the
//! renderer (input) and by the executor (output).

use super::notebook::{DocumentLookup, NotebookAttachment, PathResolver, find_notebook_attachment};
use super::selector::{Selection, SelectionRule};
use crate::config::NotebookConfig;
use crate::history::{PromptContext, Round, RoundId};
use tracing::debug;

/// One chronological piece of the summarization input.
#[derive(Debug, Clone, PartialEq)]
pub enum HistorySegment {
    /// A previously installed summary covering `round` and everything before it.
    Summary { round: RoundId, text: String },
    /// Verbatim rounds of one turn. `request` is `None` when the user message
    /// is excluded (superseded by a summary, or the in-progress message of a
    /// continuation).
    Turn {
        request: Option<String>,
        rounds: Vec<Round>,
    },
}

impl HistorySegment {
    /// Verbatim rounds of this segment, chronological.
    pub fn rounds(&self) -> &[Round] {
        match self {
            HistorySegment::Turn { rounds, .. } => rounds,
            HistorySegment::Summary { .. } => &[],
        }
    }
}

/// The assembled input for one compaction attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarizationRequest {
    pub conversation_id: String,
    /// Chronological. At most one [`HistorySegment::Summary`], always first.
    pub segments: Vec<HistorySegment>,
    pub attachment: Option<NotebookAttachment>,
    /// The round that will receive the summary.
    pub covered_round: RoundId,
}

impl SummarizationRequest {
    /// Every verbatim round, chronological.
    pub fn rounds(&self) -> impl DoubleEndedIterator<Item = &Round> {
        self.segments.iter().flat_map(HistorySegment::rounds)
    }

    /// The earlier summary this request builds on, if any.
    pub fn prior_summary(&self) -> Option<&str> {
        self.segments.iter().find_map(|s| match s {
            HistorySegment::Summary { text, .. } => Some(text.as_str()),
            HistorySegment::Turn { .. } => None,
        })
    }
}

/// Notebook collaborators for the optional attachment step.
#[derive(Clone, Copy)]
pub struct NotebookSources<'a> {
    pub config: &'a NotebookConfig,
    pub resolver: &'a dyn PathResolver,
    pub documents: &'a dyn DocumentLookup,
}

/// Builds a [`SummarizationRequest`] from a prompt context and a selection.
#[derive(Default)]
pub struct SummarizationRequestBuilder<'a> {
    notebook: Option<NotebookSources<'a>>,
}

impl<'a> SummarizationRequestBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the notebook attachment step.
    pub fn with_notebook(mut self, sources: NotebookSources<'a>) -> Self {
        self.notebook = Some(sources);
        self
    }

    pub fn build(&self, ctx: &PromptContext<'_>, selection: &Selection) -> SummarizationRequest {
        let (mut segments, stop) = collect_backward(ctx, selection);
        segments.reverse();
        if let Some((round, text)) = stop {
            segments.insert(0, HistorySegment::Summary { round, text });
        }

        let attachment = self.notebook.and_then(|nb| {
            let newest_first = segments.iter().rev().flat_map(|s| s.rounds().iter().rev());
            match find_notebook_attachment(newest_first, nb.config, nb.resolver, nb.documents) {
                Ok(att) => Some(att),
                Err(miss) => {
                    debug!("No notebook attachment: {miss:?}");
                    None
                }
            }
        });

        SummarizationRequest {
            conversation_id: ctx.conversation_id().to_string(),
            segments,
            attachment,
            covered_round: selection.covered_round.clone(),
        }
    }
}

// ── Backward collection ────────────────────────────────────────────

/// Rounds gathered from one turn, newest first.
struct Collected<'r> {
    rounds: Vec<&'r Round>,
    /// The round that stopped the walk, if it was inside this turn.
    stopped_at: Option<&'r Round>,
}

/// Scan `rounds` (newest first) until a round with a summary.
fn collect_until_summary<'r>(rounds: impl Iterator<Item = &'r Round>) -> Collected<'r> {
    let mut collected = Vec::new();
    for round in rounds {
        if round.has_summary() {
            return Collected {
                rounds: collected,
                stopped_at: Some(round),
            };
        }
        collected.push(round);
    }
    Collected {
        rounds: collected,
        stopped_at: None,
    }
}

/// Phase one: segments newest first, plus the summary that stopped the walk.
fn collect_backward(
    ctx: &PromptContext<'_>,
    selection: &Selection,
) -> (Vec<HistorySegment>, Option<(RoundId, String)>) {
    let mut segments = Vec::new();
    let conversation = &*ctx.conversation;

    // In-progress turn.
    let pending = selection
        .pending_rounds
        .iter()
        .rev()
        .filter_map(|id| conversation.round(id));
    let found = collect_until_summary(pending);
    let request = (!selection.is_continuation && found.stopped_at.is_none())
        .then(|| ctx.query.clone());
    if !found.rounds.is_empty() || request.is_some() {
        segments.push(HistorySegment::Turn {
            request,
            rounds: found
                .rounds
                .iter()
                .rev()
                .map(|r| with_pending_results(ctx, r))
                .collect(),
        });
    }
    if let Some(stop) = found.stopped_at {
        return (segments, summary_of(stop));
    }

    // Persisted turns. Turns after the covered round's turn postdate the
    // summary attachment point and stay out of this request.
    let skip_trailing = selection.rule == SelectionRule::PriorTurn;
    let turns = ctx
        .history()
        .iter()
        .rev()
        .skip_while(|t| skip_trailing && !t.rounds.contains(&selection.covered_round));
    for turn in turns {
        let found = collect_until_summary(conversation.turn_rounds(turn).rev());
        let request = found.stopped_at.is_none().then(|| turn.request.clone());
        if !found.rounds.is_empty() || request.is_some() {
            segments.push(HistorySegment::Turn {
                request,
                rounds: found.rounds.into_iter().rev().cloned().collect(),
            });
        }
        if let Some(stop) = found.stopped_at {
            return (segments, summary_of(stop));
        }
    }
    (segments, None)
}

fn summary_of(round: &Round) -> Option<(RoundId, String)> {
    round
        .summary
        .as_ref()
        .map(|text| (round.id.clone(), text.clone()))
}

/// Clone a pending round with results still held by the prompt context
/// merged in.
fn with_pending_results(ctx: &PromptContext<'_>, round: &Round) -> Round {
    let mut merged = round.clone();
    for call in &round.tool_calls {
        if !merged.tool_results.contains_key(&call.id)
            && let Some(result) = ctx.tool_result(round, &call.id)
        {
            merged.tool_results.insert(call.id.clone(), result.clone());
        }
    }
    merged
}
