//! Lifecycle events and the progress side channel for compaction attempts.
//!
//! The [`Compactor`](super::Compactor) reports what it decided through
//! [`CompactionEvent`] variants. Callers implement [`EventHandler`] to log,
//! update a UI, or collect metrics. Handlers are observers only; nothing
//! they do changes the attempt's outcome.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//!
//! Progress for the outstanding request goes through a separate
//! [`ProgressSink`], driven by a detached task. See [`spawn_progress`].

use super::patcher::PatchLocation;
use crate::context::Selection;
use crate::error::CompactionError;
use crate::history::RoundId;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted during one compaction attempt.
#[derive(Debug)]
pub enum CompactionEvent<'a> {
    /// Rounds were selected for summarization.
    Selected {
        conversation_id: &'a str,
        selection: &'a Selection,
    },
    /// The summarization prompt was rendered within budget.
    Rendered {
        messages: usize,
        tokens: usize,
        budget: usize,
    },
    /// Tool schemas were normalized for the target model.
    ToolsNormalized { kept: usize, dropped: usize },
    /// The endpoint returned a summary that fits the output budget.
    Summarized { tokens: usize, budget: usize },
    /// The summary was written onto its covered round.
    Installed {
        round: &'a RoundId,
        location: PatchLocation,
    },
    /// The covered round could not be found; nothing was written.
    NotInstalled { round: &'a RoundId },
    /// The attempt failed after selection.
    Failed { error: &'a CompactionError },
}

/// Handler for compaction events. The default implementation ignores them.
///
/// # Example
///
/// ```ignore
/// struct MyHandler;
///
/// impl EventHandler for MyHandler {
///     fn on_event(&self, event: &CompactionEvent<'_>) {
///         if let CompactionEvent::Installed { round, .. } = event {
///             println!("summary installed on {round}");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &CompactionEvent<'_>) {
        let _ = event;
    }
}

/// A no-op event handler.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&CompactionEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&CompactionEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&CompactionEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &CompactionEvent<'_>) {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers, in
/// registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, DebugHandler::new());
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &CompactionEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// An event handler that logs events via `tracing` at `debug`. The executor
/// already logs installs and failures at `info` and `warn`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &CompactionEvent<'_>) {
        match event {
            CompactionEvent::Selected {
                conversation_id,
                selection,
            } => {
                debug!(
                    "[{conversation_id}] compacting through {} ({:?}, {} pending, continuation={})",
                    selection.covered_round,
                    selection.rule,
                    selection.pending_rounds.len(),
                    selection.is_continuation,
                );
            }
            CompactionEvent::Rendered {
                messages,
                tokens,
                budget,
            } => {
                debug!("Summarization prompt: {messages} messages, ~{tokens}/{budget} tokens");
            }
            CompactionEvent::ToolsNormalized { kept, dropped } => {
                debug!("Tool schemas: {kept} kept, {dropped} dropped");
            }
            CompactionEvent::Summarized { tokens, budget } => {
                debug!("Summary: ~{tokens}/{budget} tokens");
            }
            CompactionEvent::Installed { round, location } => {
                debug!("Summary installed on round {round} ({location:?})");
            }
            CompactionEvent::NotInstalled { round } => {
                debug!("Covered round {round} not found");
            }
            CompactionEvent::Failed { error } => {
                debug!("Compaction failed: {error}");
            }
        }
    }
}

// ── Progress side channel ──────────────────────────────────────────

/// Progress notifications for the outstanding summarization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressUpdate {
    InProgress { message: String },
    Finished,
}

/// Receives progress notifications. Called from a detached task.
pub trait ProgressSink: Send + Sync + 'static {
    fn on_progress(&self, update: ProgressUpdate);
}

/// Resolves the progress notification when dropped.
pub struct ProgressGuard {
    finish: Finish,
}

enum Finish {
    Task(Option<oneshot::Sender<()>>),
    Inline(Arc<dyn ProgressSink>),
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        match &mut self.finish {
            Finish::Task(done) => {
                if let Some(tx) = done.take() {
                    let _ = tx.send(());
                }
            }
            Finish::Inline(sink) => sink.on_progress(ProgressUpdate::Finished),
        }
    }
}

/// Emit `InProgress` now and `Finished` once the returned guard is dropped.
///
/// Notifications run on a detached task when a tokio runtime is available,
/// so a slow sink never delays the caller. Without a runtime they are
/// delivered inline.
pub fn spawn_progress(sink: Arc<dyn ProgressSink>, message: impl Into<String>) -> ProgressGuard {
    let message = message.into();
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        sink.on_progress(ProgressUpdate::InProgress { message });
        return ProgressGuard {
            finish: Finish::Inline(sink),
        };
    };

    let (tx, rx) = oneshot::channel();
    handle.spawn(async move {
        sink.on_progress(ProgressUpdate::InProgress { message });
        // Fired or dropped, the request has settled either way.
        let _ = rx.await;
        sink.on_progress(ProgressUpdate::Finished);
    });
    ProgressGuard {
        finish: Finish::Task(Some(tx)),
    }
}
