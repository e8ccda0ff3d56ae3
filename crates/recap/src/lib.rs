//! Conversation-history compaction for tool-using LLM agents.
//!
//! `recap` replaces the oldest part of a long agent conversation with a
//! model-written summary, so the next prompt fits the target model's context
//! window. The entry point is the [`Compactor`](compaction::Compactor): one
//! call selects the rounds to summarize, renders them into a bounded
//! summarization prompt, asks a chat-completion endpoint for the summary,
//! validates it, reports one telemetry event, and installs the summary on the
//! covered round.
//!
//! ```ignore
//! use recap::compaction::{Compactor, LoggingHandler, TracingTelemetrySink};
//! use recap::context::{CharEstimate, ConversationRenderer};
//!
//! let client = OpenRouterClient::new(api_key)?;
//! let counter = CharEstimate::default();
//! let renderer = ConversationRenderer::new(&counter);
//! let compactor = Compactor::new(&client, &renderer, &counter, CompactionConfig::default())
//!     .with_telemetry(&TracingTelemetrySink)
//!     .with_event_handler(&LoggingHandler);
//!
//! let mut ctx = PromptContext::new(&mut conversation, "next question");
//! let done = compactor.compact(&mut ctx, &ModelInfo::new(model, 128_000), &tools, true).await?;
//! println!("{}", done.summary);
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`history`] | Rounds, turns, the round arena, prompt context, snapshots, summary restore |
//! | [`context`] | Round selection, request assembly, notebook attachment, rendering, token counting |
//! | [`compaction`] | [`Compactor`](compaction::Compactor), outcomes, telemetry, events, history patching |
//! | [`api`] | The [`ChatEndpoint`](api::ChatEndpoint) seam and per-family tool normalization |
//! | [`config`] | [`CompactionConfig`](config::CompactionConfig) and feature toggles |
//! | [`error`] | Typed errors |
//!
//! The wire types at the crate root ([`Message`], [`ChatRequest`],
//! [`ToolDef`]) follow the OpenAI chat-completions format as accepted by
//! OpenRouter.

pub mod api;
pub mod compaction;
pub mod config;
pub mod context;
pub mod error;
pub mod history;

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body. Unset optional fields are omitted from
/// serialization.
#[derive(Serialize, Debug, Clone, Default)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub messages: Vec<Message>,

    // Generation parameters
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    // Tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

/// Tool-choice mode. Summarization offers tools for context only, so only
/// the mode that forbids calling them is modeled.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    None,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Prompt-cache breakpoint. Providers that do not cache ignore it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            cache_control: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            cache_control: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            cache_control: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
            cache_control: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
            cache_control: None,
        }
    }
}

/// Cache marker in the Anthropic `cache_control` shape, which OpenRouter
/// forwards to providers that support it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub kind: String,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self {
            kind: "ephemeral".into(),
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    ///
    /// `ToolType` is always `Function` in the current API.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

// ── Response types ─────────────────────────────────────────────────

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    #[serde(default)]
    id: Option<String>,
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Clean return type from `OpenRouterClient::chat()`.
#[derive(Debug)]
pub struct ChatCompletion {
    /// Server-assigned generation id.
    pub id: Option<String>,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) referer: String,
    pub(crate) title: String,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        Self::with_headers(api_key, "https://github.com/recap-rs/recap", "recap")
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("recap/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, String> {
        let msg_count = body.messages.len();
        let tool_count = body.tools.as_ref().map_or(0, |t| t.len());
        let model_label = body.model.as_deref().unwrap_or("(none)");
        debug!(
            "LLM request: model={}, messages={}, tools={}, temp={:?}, stream={:?}",
            model_label, msg_count, tool_count, body.temperature, body.stream,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;

        let elapsed = start.elapsed();
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            elapsed.as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("OpenRouter API HTTP {status}: {text}"));
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| format!("failed to parse response: {e}"))?;

        if let Some(err) = parsed.error {
            return Err(format!("OpenRouter API error: {}", err.message));
        }

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        let choice = parsed.choices.and_then(|c| c.into_iter().next());

        match choice {
            Some(ref c) => {
                let content_len = c.message.content.as_ref().map_or(0, |s| s.len());
                let tc_count = c.message.tool_calls.as_ref().map_or(0, |t| t.len());
                debug!(
                    "LLM output: {} chars text, {} tool call(s)",
                    content_len, tc_count
                );
            }
            None => debug!("LLM output: empty (no choices)"),
        }

        match choice {
            Some(c) => Ok(ChatCompletion {
                id: parsed.id,
                content: c.message.content,
                tool_calls: c.message.tool_calls.unwrap_or_default(),
                usage: parsed.usage,
                finish_reason: c.finish_reason,
            }),
            None => Ok(ChatCompletion {
                id: parsed.id,
                content: None,
                tool_calls: vec![],
                usage: parsed.usage,
                finish_reason: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content.as_deref(), Some("hello"));
        assert!(sys.cache_control.is_none());

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);

        let assist = Message::assistant_text("prefill");
        assert_eq!(assist.role, MessageRole::Assistant);
        assert_eq!(assist.content.as_deref(), Some("prefill"));

        let tool = Message::tool_result("call-1", "result");
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn chat_request_default_skips_none_fields() {
        let req = ChatRequest {
            model: Some("test-model".into()),
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
        assert!(json["messages"][0].get("cache_control").is_none());
    }

    #[test]
    fn summarization_request_serializes_explicit_fields() {
        let mut system = Message::system("s");
        system.cache_control = Some(CacheControl::ephemeral());
        let req = ChatRequest {
            model: Some("m".into()),
            messages: vec![system],
            temperature: Some(0.0),
            stream: Some(false),
            tools: Some(vec![ToolDef::new(
                "grep",
                "Search files",
                serde_json::json!({"type": "object"}),
            )]),
            tool_choice: Some(ToolChoice::None),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["stream"], false);
        assert_eq!(json["tool_choice"], "none");
        assert_eq!(json["messages"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(json["tools"][0]["type"], "function");
    }

    #[test]
    fn raw_response_keeps_generation_id() {
        let raw: RawChatResponse = serde_json::from_str(
            r#"{"id":"gen-1","choices":[{"message":{"content":"S"},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert_eq!(raw.id.as_deref(), Some("gen-1"));
        assert_eq!(raw.choices.unwrap()[0].finish_reason.as_deref(), Some("stop"));
    }
}
