//! Conversation history: turns, rounds, and the per-render prompt context.
//!
//! A [`Conversation`] is an ordered list of [`Turn`]s. Each turn references
//! its [`Round`]s by [`RoundId`]; the round bodies live in a [`RoundArena`]
//! owned by the conversation. Turns and rounds are shared across every
//! render of the same conversation. The only in-place edit the engine makes
//! is the `summary` field of a round, and it goes through
//! [`RoundArena::patch_summary`].
//!
//! A [`PromptContext`] is built per render. It borrows the conversation and
//! carries the in-progress turn: the user query, the rounds produced so far
//! (`tool_call_rounds`), and tool results not yet attached to a round.
//!
//! - [`restore`]: reinstall summaries recorded in turn result metadata.
//! - [`snapshot`]: JSON snapshot of a conversation plus its in-progress turn.

pub mod restore;
pub mod snapshot;

use crate::error::HistoryError;
use crate::{CallType, FunctionCallData, ToolCall};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// ── Identifiers ────────────────────────────────────────────────────

/// Stable identifier of a round. Unique within a conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RoundId(String);

impl RoundId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoundId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RoundId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ── Rounds ─────────────────────────────────────────────────────────

/// A tool call issued by the assistant during a round.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    /// Call id. May carry an internal suffix, see
    /// [`strip_internal_ids`](crate::compaction::executor::strip_internal_ids).
    pub id: String,
    pub name: String,
    /// Raw JSON arguments string, as produced by the model.
    pub arguments: String,
}

impl ToolInvocation {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Convert to the wire representation used in assistant messages.
    pub fn to_tool_call(&self) -> ToolCall {
        ToolCall {
            id: self.id.clone(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: self.name.clone(),
                arguments: self.arguments.clone(),
            },
        }
    }
}

/// Output of a tool invocation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// One model-generation step: assistant text, the tool calls it issued, and
/// the results of those calls keyed by call id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Round {
    pub id: RoundId,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolInvocation>,
    #[serde(default)]
    pub tool_results: BTreeMap<String, ToolResult>,
    /// Summary of everything up to and including this round. Once set,
    /// every round chronologically before it is superseded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Round {
    pub fn new(id: impl Into<RoundId>, response: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            response: response.into(),
            tool_calls: Vec::new(),
            tool_results: BTreeMap::new(),
            summary: None,
        }
    }

    /// Add a tool call issued during this round.
    pub fn with_tool_call(mut self, call: ToolInvocation) -> Self {
        self.tool_calls.push(call);
        self
    }

    /// Record the result of one of this round's tool calls.
    pub fn with_tool_result(mut self, call_id: impl Into<String>, result: ToolResult) -> Self {
        self.tool_results.insert(call_id.into(), result);
        self
    }

    pub fn has_summary(&self) -> bool {
        self.summary.is_some()
    }

    /// Name of the last tool called in this round.
    pub fn last_tool_name(&self) -> Option<&str> {
        self.tool_calls.last().map(|c| c.name.as_str())
    }
}

// ── Arena ──────────────────────────────────────────────────────────

/// Result of [`RoundArena::patch_summary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStatus {
    /// The summary field was written with a new value.
    Installed,
    /// The round already carried exactly this summary.
    Unchanged,
    /// No round with that id exists.
    NotFound,
}

/// Round storage keyed by stable id, preserving insertion order.
///
/// Serialized as a plain list of rounds; duplicates are rejected on load.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(try_from = "Vec<Round>", into = "Vec<Round>")]
pub struct RoundArena {
    rounds: Vec<Round>,
    index: HashMap<RoundId, usize>,
}

impl RoundArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a round. Ids must be unique.
    pub fn insert(&mut self, round: Round) -> Result<RoundId, HistoryError> {
        if self.index.contains_key(&round.id) {
            return Err(HistoryError::DuplicateRound(round.id));
        }
        let id = round.id.clone();
        self.index.insert(id.clone(), self.rounds.len());
        self.rounds.push(round);
        Ok(id)
    }

    pub fn get(&self, id: &RoundId) -> Option<&Round> {
        self.index.get(id).map(|&i| &self.rounds[i])
    }

    pub fn contains(&self, id: &RoundId) -> bool {
        self.index.contains_key(id)
    }

    /// Overwrite the summary of the round with the given id.
    pub fn patch_summary(&mut self, id: &RoundId, text: &str) -> PatchStatus {
        let Some(&i) = self.index.get(id) else {
            return PatchStatus::NotFound;
        };
        let round = &mut self.rounds[i];
        if round.summary.as_deref() == Some(text) {
            return PatchStatus::Unchanged;
        }
        round.summary = Some(text.to_string());
        PatchStatus::Installed
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Round> {
        self.rounds.iter()
    }
}

impl TryFrom<Vec<Round>> for RoundArena {
    type Error = HistoryError;

    fn try_from(rounds: Vec<Round>) -> Result<Self, Self::Error> {
        let mut arena = RoundArena::new();
        for round in rounds {
            arena.insert(round)?;
        }
        Ok(arena)
    }
}

impl From<RoundArena> for Vec<Round> {
    fn from(arena: RoundArena) -> Self {
        arena.rounds
    }
}

// ── Turns ──────────────────────────────────────────────────────────

/// A summary recorded durably alongside a turn's result.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PersistedSummary {
    pub round_id: RoundId,
    pub text: String,
}

/// Result metadata carried over from the process that produced a turn.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TurnResultMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// Summary installed while this turn was in progress, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<PersistedSummary>,
}

/// One user-triggered exchange.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Turn {
    pub id: String,
    /// The user message that started the turn.
    pub request: String,
    /// Round ids in chronological order.
    #[serde(default)]
    pub rounds: Vec<RoundId>,
    #[serde(default)]
    pub result: TurnResultMetadata,
}

impl Turn {
    /// Record a summary in this turn's result metadata so it can be
    /// restored on the next conversation turn.
    pub fn record_summary(&mut self, summary: PersistedSummary) {
        self.result.summary = Some(summary);
    }
}

// ── Conversation ───────────────────────────────────────────────────

/// The persisted history of a conversation.
///
/// Every round id a turn lists must be stored in `rounds`; loading rejects
/// a conversation that names a missing round.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(try_from = "StoredConversation")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub rounds: RoundArena,
}

/// Wire shape of [`Conversation`] before its turns are checked.
#[derive(Deserialize)]
struct StoredConversation {
    id: String,
    #[serde(default)]
    turns: Vec<Turn>,
    #[serde(default)]
    rounds: RoundArena,
}

impl TryFrom<StoredConversation> for Conversation {
    type Error = HistoryError;

    fn try_from(stored: StoredConversation) -> Result<Self, Self::Error> {
        let conversation = Conversation {
            id: stored.id,
            turns: stored.turns,
            rounds: stored.rounds,
        };
        conversation.check_turns()?;
        Ok(conversation)
    }
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            turns: Vec::new(),
            rounds: RoundArena::new(),
        }
    }

    /// Append a completed turn and store its rounds.
    ///
    /// Either every round is stored or none is.
    pub fn push_turn(
        &mut self,
        id: impl Into<String>,
        request: impl Into<String>,
        rounds: Vec<Round>,
    ) -> Result<&mut Turn, HistoryError> {
        if let Some(dup) = rounds.iter().find(|r| self.rounds.contains(&r.id)) {
            return Err(HistoryError::DuplicateRound(dup.id.clone()));
        }
        let mut ids = Vec::with_capacity(rounds.len());
        for round in rounds {
            ids.push(self.rounds.insert(round)?);
        }
        self.turns.push(Turn {
            id: id.into(),
            request: request.into(),
            rounds: ids,
            result: TurnResultMetadata::default(),
        });
        let last = self.turns.len() - 1;
        Ok(&mut self.turns[last])
    }

    /// Fail with the first round id a turn lists that the arena lacks.
    pub fn check_turns(&self) -> Result<(), HistoryError> {
        match self
            .turns
            .iter()
            .flat_map(|t| &t.rounds)
            .find(|id| !self.rounds.contains(id))
        {
            Some(missing) => Err(HistoryError::UnknownRound(missing.clone())),
            None => Ok(()),
        }
    }

    pub fn round(&self, id: &RoundId) -> Option<&Round> {
        self.rounds.get(id)
    }

    /// Rounds of a turn in chronological order. Ids missing from the arena
    /// are skipped.
    pub fn turn_rounds<'a>(&'a self, turn: &'a Turn) -> impl DoubleEndedIterator<Item = &'a Round> {
        turn.rounds.iter().filter_map(|id| self.rounds.get(id))
    }
}

// ── Prompt context ─────────────────────────────────────────────────

/// Per-render aggregate: persisted history plus the in-progress turn.
#[derive(Debug)]
pub struct PromptContext<'c> {
    pub conversation: &'c mut Conversation,
    /// The user message of the in-progress turn.
    pub query: String,
    /// Round ids of the in-progress turn, chronological.
    pub tool_call_rounds: Vec<RoundId>,
    /// Tool results produced in the in-progress turn, keyed by call id.
    pub tool_call_results: BTreeMap<String, ToolResult>,
    /// The newest user message is excluded from context because it is what
    /// overflowed the budget.
    pub is_continuation: bool,
}

impl<'c> PromptContext<'c> {
    pub fn new(conversation: &'c mut Conversation, query: impl Into<String>) -> Self {
        Self {
            conversation,
            query: query.into(),
            tool_call_rounds: Vec::new(),
            tool_call_results: BTreeMap::new(),
            is_continuation: false,
        }
    }

    /// Store a round produced by the in-progress turn.
    pub fn push_round(&mut self, round: Round) -> Result<&RoundId, HistoryError> {
        let id = self.conversation.rounds.insert(round)?;
        self.tool_call_rounds.push(id);
        Ok(&self.tool_call_rounds[self.tool_call_rounds.len() - 1])
    }

    /// Record a tool result for the in-progress turn.
    pub fn push_tool_result(&mut self, call_id: impl Into<String>, result: ToolResult) {
        self.tool_call_results.insert(call_id.into(), result);
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation.id
    }

    pub fn history(&self) -> &[Turn] {
        &self.conversation.turns
    }

    /// Rounds of the in-progress turn, chronological.
    pub fn pending_rounds(&self) -> impl DoubleEndedIterator<Item = &Round> {
        self.tool_call_rounds
            .iter()
            .filter_map(|id| self.conversation.rounds.get(id))
    }

    /// Look up a tool result: the round's own results first, then the
    /// in-progress turn's pending results.
    pub fn tool_result<'a>(&'a self, round: &'a Round, call_id: &str) -> Option<&'a ToolResult> {
        round
            .tool_results
            .get(call_id)
            .or_else(|| self.tool_call_results.get(call_id))
    }
}
