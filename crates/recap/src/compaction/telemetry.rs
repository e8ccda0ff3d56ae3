//! Descriptive statistics about a compaction attempt, and where they go.
//!
//! [`CompactionStats::from_context`] is a pure read of the prompt context.
//! Each terminal outcome produces one [`TelemetryEvent`] that is handed to a
//! [`TelemetrySink`]. Sinks must not block and must not fail; anything that
//! needs I/O should queue and return.

use crate::history::{PromptContext, Round};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Event name for compaction outcomes.
pub const COMPACTION_EVENT: &str = "summarizedConversationHistory";

/// Counters computed from the prompt context at the start of an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionStats {
    pub conversation_id: String,
    /// Rounds across all persisted turns plus the in-progress turn.
    pub total_rounds: usize,
    /// Rounds newer than the latest round carrying a summary. Equals
    /// `total_rounds` when no round has one.
    pub rounds_since_last_summary: usize,
    pub last_used_tool: Option<String>,
    /// The in-progress turn already has rounds.
    pub during_tool_calling: bool,
}

impl CompactionStats {
    pub fn from_context(ctx: &PromptContext<'_>) -> Self {
        let conversation = &*ctx.conversation;
        let history_rounds = move || {
            ctx.history()
                .iter()
                .rev()
                .flat_map(move |t| conversation.turn_rounds(t).rev())
        };
        let newest_first = move || ctx.pending_rounds().rev().chain(history_rounds());

        let total_rounds = newest_first().count();
        let rounds_since_last_summary = newest_first()
            .position(Round::has_summary)
            .unwrap_or(total_rounds);

        let last_used_tool = ctx
            .pending_rounds()
            .rev()
            .find_map(Round::last_tool_name)
            .or_else(|| {
                ctx.history().last().and_then(|turn| {
                    conversation
                        .turn_rounds(turn)
                        .rev()
                        .find_map(Round::last_tool_name)
                })
            })
            .map(str::to_string);

        Self {
            conversation_id: ctx.conversation_id().to_string(),
            total_rounds,
            rounds_since_last_summary,
            last_used_tool,
            during_tool_calling: !ctx.tool_call_rounds.is_empty(),
        }
    }
}

/// One telemetry record: string properties and numeric measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub name: String,
    pub properties: BTreeMap<String, String>,
    pub measurements: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryEvent {
    /// The event for one terminal compaction outcome.
    pub fn compaction(
        outcome: &str,
        stats: &CompactionStats,
        model: &str,
        response_id: Option<&str>,
        duration: Duration,
    ) -> Self {
        let properties = BTreeMap::from([
            ("outcome".to_string(), outcome.to_string()),
            ("conversationId".to_string(), stats.conversation_id.clone()),
            ("model".to_string(), model.to_string()),
            (
                "responseId".to_string(),
                response_id.unwrap_or_default().to_string(),
            ),
            (
                "lastUsedTool".to_string(),
                stats.last_used_tool.clone().unwrap_or_default(),
            ),
            (
                "isDuringToolCalling".to_string(),
                stats.during_tool_calling.to_string(),
            ),
        ]);
        let measurements = BTreeMap::from([
            ("numRounds".to_string(), stats.total_rounds as f64),
            (
                "numRoundsSinceLastSummarization".to_string(),
                stats.rounds_since_last_summary as f64,
            ),
            ("durationMs".to_string(), duration.as_millis() as f64),
        ]);
        Self {
            name: COMPACTION_EVENT.to_string(),
            properties,
            measurements,
            timestamp: Utc::now(),
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn measurement(&self, key: &str) -> Option<f64> {
        self.measurements.get(key).copied()
    }
}

/// Receives telemetry events. Must return promptly and never panic.
pub trait TelemetrySink: Send + Sync {
    fn send(&self, event: TelemetryEvent);
}

/// Discards every event.
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn send(&self, _event: TelemetryEvent) {}
}

/// Logs each event at `info` under the `recap::telemetry` target.
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn send(&self, event: TelemetryEvent) {
        let props: Vec<String> = event
            .properties
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let measures: Vec<String> = event
            .measurements
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        info!(
            target: "recap::telemetry",
            "{} at {}: {} | {}",
            event.name,
            event.timestamp.to_rfc3339(),
            props.join(" "),
            measures.join(" ")
        );
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the events received so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl TelemetrySink for CollectingSink {
    fn send(&self, event: TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
