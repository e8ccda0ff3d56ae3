//! Building the summarization input: selection, assembly, and rendering.
//!
//! A compaction attempt flows through these modules in order:
//!
//! 1. **[`selector`]**: [`RoundSelector`] decides which rounds the summary
//!    replaces and which round receives it.
//! 2. **[`request`]**: [`SummarizationRequestBuilder`] walks history back
//!    from the selection, stops at the latest installed summary, and emits
//!    chronological [`HistorySegment`]s.
//! 3. **[`notebook`]**: optional, best-effort attachment of the most
//!    recently executed notebook.
//! 4. **[`render`]**: [`PromptRenderer`] turns the request into messages
//!    and enforces the input budget.
//!
//! [`tokens`] supplies the [`TokenCounter`] used for both budgets.

pub mod notebook;
pub mod render;
pub mod request;
pub mod selector;
pub mod tokens;

// Re-export commonly used items at the module level.
pub use render::{ConversationRenderer, PromptRenderer, RenderFailure, RenderProps, RenderedPrompt};
pub use request::{HistorySegment, SummarizationRequest, SummarizationRequestBuilder};
pub use selector::{RoundSelector, Selection, SelectionRule};
pub use tokens::{CharEstimate, DEFAULT_CHARS_PER_TOKEN, TokenCounter};
