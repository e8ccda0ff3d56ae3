//! Running a compaction attempt end to end.
//!
//! - [`executor`]: [`Compactor`], the single entry point.
//! - [`outcome`]: [`CompactionOutcome`] and the [`OutcomeRecorder`] that
//!   reports it exactly once.
//! - [`telemetry`]: [`CompactionStats`], [`TelemetryEvent`], and sinks.
//! - [`events`]: lifecycle [`CompactionEvent`]s, handlers, and the progress
//!   side channel.
//! - [`patcher`]: [`HistoryPatcher`], which installs a validated summary.

pub mod events;
pub mod executor;
pub mod outcome;
pub mod patcher;
pub mod telemetry;

// Re-export commonly used items at the module level.
pub use events::{
    CompactionEvent, CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler,
    NoopHandler, ProgressGuard, ProgressSink, ProgressUpdate, spawn_progress,
};
pub use executor::{CompactionSummary, Compactor, strip_internal_ids};
pub use outcome::{CompactionOutcome, OutcomeRecorder, ReportedOutcome};
pub use patcher::{HistoryPatcher, PatchLocation, PatchResult};
pub use telemetry::{
    COMPACTION_EVENT, CollectingSink, CompactionStats, NoopTelemetry, TelemetryEvent,
    TelemetrySink, TracingTelemetrySink,
};
