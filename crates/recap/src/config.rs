//! Configuration types for the [`Compactor`](crate::compaction::Compactor).
//!
//! Every field has a sensible default. Override specific settings with the
//! builder methods, set struct fields directly, or load a JSON file with
//! [`CompactionConfig::from_json_file`] (missing keys keep their defaults).
//!
//! ```ignore
//! let config = CompactionConfig::default()
//!     .with_model("anthropic/claude-3.5-haiku")
//!     .with_summary_token_budget(2048)
//!     .with_tool_result_truncation(4000);
//!
//! let config = CompactionConfig {
//!     notebook: Toggle::disabled(),
//!     ..CompactionConfig::default()
//! };
//! ```

use crate::context::tokens::DEFAULT_CHARS_PER_TOKEN;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default output budget for a generated summary, in tokens.
pub const DEFAULT_SUMMARY_TOKEN_BUDGET: usize = 4096;

/// Default per-tool-result truncation length, in characters.
pub const DEFAULT_TOOL_RESULT_TRUNCATION: usize = 8_000;

// ── Generic toggle ────────────────────────────────────────────────

/// Generic enabled/disabled wrapper for optional features.
///
/// When `enabled` is `false`, the feature is skipped regardless of the inner
/// config values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Toggle<T: Default> {
    pub enabled: bool,
    pub config: T,
}

impl<T: Default> Toggle<T> {
    /// Create a disabled instance with default inner config.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: T::default(),
        }
    }

    /// The inner config, if enabled.
    pub fn active(&self) -> Option<&T> {
        self.enabled.then_some(&self.config)
    }
}

impl<T: Default> Default for Toggle<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            config: T::default(),
        }
    }
}

// ── Notebook attachment ───────────────────────────────────────────

/// Which tool calls identify a working notebook, and where their path lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotebookConfig {
    /// Tool names that execute notebook cells.
    pub tool_names: Vec<String>,
    /// JSON argument key holding the notebook path.
    pub path_argument: String,
}

impl Default for NotebookConfig {
    fn default() -> Self {
        Self {
            tool_names: vec!["run_notebook_cell".into(), "execute_notebook_cell".into()],
            path_argument: "filePath".into(),
        }
    }
}

impl NotebookConfig {
    pub fn is_notebook_tool(&self, name: &str) -> bool {
        self.tool_names.iter().any(|t| t == name)
    }
}

// ── Compaction config ─────────────────────────────────────────────

/// Settings for one [`Compactor`](crate::compaction::Compactor).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Model used for summarization. `None` uses the target model.
    pub model: Option<String>,
    /// Input budget for the rendered summarization prompt. `None` uses the
    /// target model's prompt budget.
    pub input_token_budget: Option<usize>,
    /// Output budget: summaries longer than this are rejected.
    pub summary_token_budget: usize,
    /// Maximum characters kept from each tool result in the prompt.
    pub tool_result_truncation: usize,
    /// Ratio for the default character-based token estimator.
    pub chars_per_token: f64,
    /// Attach the most recently executed notebook to the prompt.
    pub notebook: Toggle<NotebookConfig>,
    /// Extra instructions appended to the summarization prompt.
    pub extra_instructions: Option<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            model: None,
            input_token_budget: None,
            summary_token_budget: DEFAULT_SUMMARY_TOKEN_BUDGET,
            tool_result_truncation: DEFAULT_TOOL_RESULT_TRUNCATION,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            notebook: Toggle::default(),
            extra_instructions: None,
        }
    }
}

impl CompactionConfig {
    /// Load a config from a JSON file. Missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config '{}': {e}", path.display()))?;
        serde_json::from_str(&content)
            .map_err(|e| format!("failed to parse config '{}': {e}", path.display()))
    }

    /// Set the summarization model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Override the input token budget.
    pub fn with_input_token_budget(mut self, tokens: usize) -> Self {
        self.input_token_budget = Some(tokens);
        self
    }

    /// Set the output token budget for summaries.
    pub fn with_summary_token_budget(mut self, tokens: usize) -> Self {
        self.summary_token_budget = tokens;
        self
    }

    /// Set the per-tool-result truncation length.
    pub fn with_tool_result_truncation(mut self, chars: usize) -> Self {
        self.tool_result_truncation = chars;
        self
    }

    /// Append extra instructions to the summarization prompt.
    pub fn with_extra_instructions(mut self, text: impl Into<String>) -> Self {
        self.extra_instructions = Some(text.into());
        self
    }

    /// Model to use for summarization.
    pub fn summary_model<'a>(&'a self, target_model: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(target_model)
    }

    /// Input budget for a target whose prompt budget is `target_budget`.
    pub fn input_budget(&self, target_budget: usize) -> usize {
        self.input_token_budget.unwrap_or(target_budget)
    }
}
