//! The compaction entry point.
//!
//! [`Compactor::compact`] runs one attempt strictly in order: select, build,
//! render, request, validate, report, patch. The request is the only
//! suspension point and can be cancelled through a [`CancellationToken`].
//!
//! Every attempt that gets past selection reports exactly one telemetry
//! event (see [`OutcomeRecorder`]) before the result is returned. The history
//! is only touched after the summary passed every check.
//!
//! Callers must serialize attempts per conversation. Two concurrent attempts
//! on the same conversation race on the covered round's `summary` field.

use super::events::{CompactionEvent, EventHandler, NoopHandler, ProgressSink, spawn_progress};
use super::outcome::OutcomeRecorder;
use super::patcher::{HistoryPatcher, PatchResult};
use super::telemetry::{CompactionStats, NoopTelemetry, TelemetrySink};
use crate::api::endpoint::{ChatEndpoint, RequestKind, ResponseKind, is_transient_error};
use crate::api::tools::{ModelInfo, normalize_tools};
use crate::config::CompactionConfig;
use crate::context::notebook::{DocumentLookup, PathResolver};
use crate::context::request::NotebookSources;
use crate::context::{
    PromptRenderer, RenderFailure, RenderProps, RoundSelector, Selection,
    SummarizationRequestBuilder, TokenCounter,
};
use crate::error::CompactionError;
use crate::history::{PersistedSummary, PromptContext, RoundId};
use crate::{ChatRequest, Message, ToolChoice, ToolDef};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Marker that separates a tool-call id from its internal uniqueness suffix.
const INTERNAL_ID_MARKER: &str = "__internal-";

/// A summary that passed validation and was handed to the patcher.
#[derive(Debug, Clone)]
pub struct CompactionSummary {
    pub summary: String,
    pub covered_round: RoundId,
    pub patch: PatchResult,
    /// Model that produced the summary.
    pub model: String,
    pub response_id: Option<String>,
    pub prompt_tokens: usize,
    pub summary_tokens: usize,
}

impl CompactionSummary {
    /// The durable copy to store in the turn's result metadata.
    pub fn persisted(&self) -> PersistedSummary {
        PersistedSummary {
            round_id: self.covered_round.clone(),
            text: self.summary.clone(),
        }
    }
}

/// What a successful request produced, before it is reported.
struct Attempt {
    summary: String,
    prompt_tokens: usize,
    summary_tokens: usize,
}

/// Runs compaction attempts against one endpoint.
///
/// ```ignore
/// let counter = CharEstimate::default();
/// let renderer = ConversationRenderer::new(&counter);
/// let compactor = Compactor::new(&client, &renderer, &counter, CompactionConfig::default())
///     .with_telemetry(&TracingTelemetrySink)
///     .with_event_handler(&LoggingHandler);
///
/// let done = compactor.compact(&mut ctx, &target, &tools, true).await?;
/// turn.record_summary(done.persisted());
/// ```
pub struct Compactor<'a> {
    endpoint: &'a dyn ChatEndpoint,
    renderer: &'a dyn PromptRenderer,
    counter: &'a dyn TokenCounter,
    config: CompactionConfig,
    telemetry: &'a dyn TelemetrySink,
    handler: &'a dyn EventHandler,
    resolver: Option<&'a dyn PathResolver>,
    documents: Option<&'a dyn DocumentLookup>,
    progress: Option<Arc<dyn ProgressSink>>,
    cancel: CancellationToken,
}

impl<'a> Compactor<'a> {
    pub fn new(
        endpoint: &'a dyn ChatEndpoint,
        renderer: &'a dyn PromptRenderer,
        counter: &'a dyn TokenCounter,
        config: CompactionConfig,
    ) -> Self {
        Self {
            endpoint,
            renderer,
            counter,
            config,
            telemetry: &NoopTelemetry,
            handler: &NoopHandler,
            resolver: None,
            documents: None,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_telemetry(mut self, sink: &'a dyn TelemetrySink) -> Self {
        self.telemetry = sink;
        self
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.handler = handler;
        self
    }

    /// Collaborators for the notebook attachment. Ignored when the
    /// notebook toggle is disabled.
    pub fn with_notebooks(
        mut self,
        resolver: &'a dyn PathResolver,
        documents: &'a dyn DocumentLookup,
    ) -> Self {
        self.resolver = Some(resolver);
        self.documents = Some(documents);
        self
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Cancelling the token aborts an outstanding request.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Attempt one compaction of `ctx` for `target`.
    ///
    /// On success the summary has been reported and installed and the
    /// returned [`CompactionSummary`] says where. On failure nothing in the
    /// history changed. The caller decides whether to continue without
    /// compaction.
    pub async fn compact(
        &self,
        ctx: &mut PromptContext<'_>,
        target: &ModelInfo,
        tools: &[ToolDef],
        cache_breakpoints: bool,
    ) -> Result<CompactionSummary, CompactionError> {
        let selection = RoundSelector::select(ctx)?;
        self.handler.on_event(&CompactionEvent::Selected {
            conversation_id: ctx.conversation_id(),
            selection: &selection,
        });

        let model_id = self.config.summary_model(&target.id);
        let summary_model = if model_id == target.id {
            target.clone()
        } else {
            ModelInfo::new(model_id, target.max_prompt_tokens)
        };
        let mut recorder = OutcomeRecorder::new(
            self.telemetry,
            CompactionStats::from_context(ctx),
            summary_model.id.clone(),
        );

        let attempt = self
            .attempt(
                ctx,
                &selection,
                target,
                &summary_model,
                tools,
                cache_breakpoints,
                &mut recorder,
            )
            .await;
        let response_id = recorder.response_id().map(str::to_string);
        let (reported, tokens) = match attempt {
            Ok(a) => (
                recorder.succeed(a.summary, selection.covered_round.clone()),
                (a.prompt_tokens, a.summary_tokens),
            ),
            Err(e) => {
                warn!("Compaction of {} failed: {e}", ctx.conversation_id());
                self.handler.on_event(&CompactionEvent::Failed { error: &e });
                (recorder.fail(e), (0, 0))
            }
        };
        let (summary, covered_round) = reported.into_result()?;
        let (prompt_tokens, summary_tokens) = tokens;

        let patch = HistoryPatcher::patch(ctx, &covered_round, &summary);
        match patch.location() {
            Some(location) => {
                info!("Installed summary on round {covered_round} ({summary_tokens} tokens)");
                self.handler.on_event(&CompactionEvent::Installed {
                    round: &covered_round,
                    location: location.clone(),
                });
            }
            None => {
                warn!("Covered round {covered_round} not found; summary not installed");
                self.handler
                    .on_event(&CompactionEvent::NotInstalled { round: &covered_round });
            }
        }

        Ok(CompactionSummary {
            summary,
            covered_round,
            patch,
            model: summary_model.id,
            response_id,
            prompt_tokens,
            summary_tokens,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        ctx: &PromptContext<'_>,
        selection: &Selection,
        target: &ModelInfo,
        summary_model: &ModelInfo,
        tools: &[ToolDef],
        cache_breakpoints: bool,
        recorder: &mut OutcomeRecorder<'_>,
    ) -> Result<Attempt, CompactionError> {
        // ── Build ──
        let mut builder = SummarizationRequestBuilder::new();
        if let (Some(config), Some(resolver), Some(documents)) =
            (self.config.notebook.active(), self.resolver, self.documents)
        {
            builder = builder.with_notebook(NotebookSources {
                config,
                resolver,
                documents,
            });
        }
        let request = builder.build(ctx, selection);

        // ── Render ──
        let props = RenderProps {
            token_budget: self.config.input_budget(target.max_prompt_tokens),
            tool_result_truncation: self.config.tool_result_truncation,
            cache_breakpoints,
            extra_instructions: self.config.extra_instructions.clone(),
        };
        let rendered = self
            .renderer
            .render(summary_model, &request, &props)
            .map_err(|e| match e {
                RenderFailure::BudgetExceeded { used, budget } => {
                    CompactionError::BudgetExceeded { used, budget }
                }
                RenderFailure::Other(msg) => CompactionError::Render(msg),
            })?;
        self.handler.on_event(&CompactionEvent::Rendered {
            messages: rendered.messages.len(),
            tokens: rendered.token_count,
            budget: props.token_budget,
        });

        // ── Request ──
        let offered = tools.len();
        let tools = normalize_tools(tools, summary_model.family);
        self.handler.on_event(&CompactionEvent::ToolsNormalized {
            kept: tools.len(),
            dropped: offered - tools.len(),
        });
        let body = ChatRequest {
            model: Some(summary_model.id.clone()),
            messages: strip_internal_ids(rendered.messages),
            temperature: Some(0.0),
            stream: Some(false),
            tool_choice: (!tools.is_empty()).then_some(ToolChoice::None),
            tools: (!tools.is_empty()).then_some(tools),
            ..Default::default()
        };

        let progress = self
            .progress
            .clone()
            .map(|sink| spawn_progress(sink, "Summarizing conversation history"));
        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err("cancelled".to_string()),
            r = self.endpoint.complete(RequestKind::Summarization, &body) => r,
        };
        drop(progress);

        let response = response.map_err(|e| {
            debug!("Summarization request failed (transient={})", is_transient_error(&e));
            CompactionError::RequestFailed(e)
        })?;
        recorder.set_response_id(response.request_id.clone());

        // ── Validate ──
        if !response.is_success() {
            return Err(CompactionError::Upstream {
                kind: response.kind.as_str().to_string(),
                reason: response.reason.unwrap_or_default(),
            });
        }
        // An empty summary would supersede every earlier round and leave nothing.
        if response.value.trim().is_empty() {
            return Err(CompactionError::Upstream {
                kind: ResponseKind::Failed.as_str().to_string(),
                reason: "empty summary".to_string(),
            });
        }
        let summary_tokens = self.counter.count_tokens(&response.value);
        let budget = self.config.summary_token_budget;
        if summary_tokens > budget {
            return Err(CompactionError::TooLarge {
                tokens: summary_tokens,
                budget,
            });
        }
        self.handler.on_event(&CompactionEvent::Summarized {
            tokens: summary_tokens,
            budget,
        });

        Ok(Attempt {
            summary: response.value,
            prompt_tokens: rendered.token_count,
            summary_tokens,
        })
    }
}

/// Remove internal uniqueness suffixes from tool-call ids, in assistant
/// tool calls and in the matching tool results alike.
pub fn strip_internal_ids(mut messages: Vec<Message>) -> Vec<Message> {
    for msg in &mut messages {
        if let Some(ref mut calls) = msg.tool_calls {
            for call in calls {
                call.id = strip_internal_suffix(&call.id).to_string();
            }
        }
        if let Some(ref mut id) = msg.tool_call_id {
            *id = strip_internal_suffix(id).to_string();
        }
    }
    messages
}

fn strip_internal_suffix(id: &str) -> &str {
    match id.rsplit_once(INTERNAL_ID_MARKER) {
        Some((head, n)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => head,
        _ => id,
    }
}
