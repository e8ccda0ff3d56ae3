//! Renders a [`SummarizationRequest`] into model-ready messages.
//!
//! The [`PromptRenderer`] trait is the seam; callers with their own prompt
//! engine implement it. [`ConversationRenderer`] is the default: it replays
//! the selected history as chat messages between a fixed system prompt and
//! a closing instruction, and enforces the input token budget.

use super::request::{HistorySegment, SummarizationRequest};
use super::tokens::TokenCounter;
use crate::api::tools::ModelInfo;
use crate::history::Round;
use crate::{CacheControl, Message, ToolCall};
use tracing::debug;

/// System prompt for the summarization call.
const SUMMARIZATION_PROMPT: &str = "\
You are compacting the history of an agent conversation that no longer fits in \
the context window. Write a summary that replaces everything shown to you. Focus on:
- The user's goals and any constraints they stated
- What was accomplished (completed subtasks, files modified)
- Key findings and decisions made
- Failed approaches (what was tried and why it failed)
- File paths and function names mentioned
- Current plan state and what remains to be done

Rules:
- Only include facts explicitly stated in the messages. Do not infer or extrapolate.
- Preserve file paths, function names, and error messages verbatim.
- Be concise. Every token must earn its place.
- If there is an existing summary, merge the new information into it. The result \
  must be a standalone summary that replaces the existing one entirely.
- Do not call tools. Respond with the summary text only.";

const CLOSING_INSTRUCTION: &str =
    "Summarize the conversation above according to your instructions.";

/// Parameters passed through from the executor.
#[derive(Debug, Clone)]
pub struct RenderProps {
    /// Maximum tokens the rendered messages may occupy.
    pub token_budget: usize,
    /// Maximum characters kept from each tool result.
    pub tool_result_truncation: usize,
    /// Mark the system message and the last history message as cache
    /// breakpoints.
    pub cache_breakpoints: bool,
    pub extra_instructions: Option<String>,
}

/// Messages ready to send plus their measured size.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub messages: Vec<Message>,
    pub token_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderFailure {
    /// The rendered prompt does not fit the input budget.
    BudgetExceeded { used: usize, budget: usize },
    Other(String),
}

/// Turns a summarization request into messages for `model`.
pub trait PromptRenderer: Send + Sync {
    fn render(
        &self,
        model: &ModelInfo,
        request: &SummarizationRequest,
        props: &RenderProps,
    ) -> Result<RenderedPrompt, RenderFailure>;
}

/// Default renderer: replays history as chat messages.
pub struct ConversationRenderer<'a> {
    counter: &'a dyn TokenCounter,
}

impl<'a> ConversationRenderer<'a> {
    pub fn new(counter: &'a dyn TokenCounter) -> Self {
        Self { counter }
    }
}

impl PromptRenderer for ConversationRenderer<'_> {
    fn render(
        &self,
        model: &ModelInfo,
        request: &SummarizationRequest,
        props: &RenderProps,
    ) -> Result<RenderedPrompt, RenderFailure> {
        if request.segments.is_empty() {
            return Err(RenderFailure::Other(format!(
                "no history selected for round {}",
                request.covered_round
            )));
        }

        let mut system = SUMMARIZATION_PROMPT.to_string();
        if let Some(ref extra) = props.extra_instructions {
            system.push_str("\n\n");
            system.push_str(extra);
        }
        let mut messages = vec![Message::system(system)];

        for segment in &request.segments {
            match segment {
                HistorySegment::Summary { text, .. } => {
                    messages.push(Message::user(format!(
                        "=== EXISTING SUMMARY ===\n{text}"
                    )));
                }
                HistorySegment::Turn { request, rounds } => {
                    if let Some(query) = request {
                        messages.push(Message::user(query.clone()));
                    }
                    for round in rounds {
                        push_round(&mut messages, round, props.tool_result_truncation);
                    }
                }
            }
        }

        if let Some(ref att) = request.attachment {
            messages.push(Message::user(format!(
                "=== CURRENT NOTEBOOK: {} ===\n{}",
                att.snapshot.path.display(),
                att.snapshot.content
            )));
        }

        if props.cache_breakpoints {
            messages[0].cache_control = Some(CacheControl::ephemeral());
            if let Some(last) = messages.last_mut() {
                last.cache_control = Some(CacheControl::ephemeral());
            }
        }
        messages.push(Message::user(CLOSING_INSTRUCTION));

        let token_count = self.counter.count_messages(&messages);
        debug!(
            "Rendered summarization prompt for {}: {} messages, ~{} tokens (budget {})",
            model.id,
            messages.len(),
            token_count,
            props.token_budget
        );
        if token_count > props.token_budget {
            return Err(RenderFailure::BudgetExceeded {
                used: token_count,
                budget: props.token_budget,
            });
        }
        Ok(RenderedPrompt {
            messages,
            token_count,
        })
    }
}

/// Append one round: the assistant message, then one tool message per call.
fn push_round(messages: &mut Vec<Message>, round: &Round, truncation: usize) {
    let calls: Vec<ToolCall> = round.tool_calls.iter().map(|c| c.to_tool_call()).collect();
    if calls.is_empty() {
        if !round.response.is_empty() {
            messages.push(Message::assistant_text(round.response.clone()));
        }
        return;
    }

    let mut assistant = Message::assistant_tool_calls(calls);
    if !round.response.is_empty() {
        assistant.content = Some(round.response.clone());
    }
    messages.push(assistant);

    for call in &round.tool_calls {
        let content = match round.tool_results.get(&call.id) {
            Some(result) if result.is_error => {
                format!("[error] {}", truncate_result(&result.content, truncation))
            }
            Some(result) => truncate_result(&result.content, truncation),
            None => "[no result recorded]".to_string(),
        };
        messages.push(Message::tool_result(call.id.clone(), content));
    }
}

/// Truncate to `max_chars` characters, noting how many were dropped.
fn truncate_result(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }
    let mut s: String = content.chars().take(max_chars).collect();
    s.push_str(&format!("\n[... truncated {} chars]", total - max_chars));
    s
}
