//! Token sizing for prompts and summaries.
//!
//! The engine never assumes a tokenizer. Callers supply a [`TokenCounter`];
//! [`CharEstimate`] is the default, estimating from character counts the way
//! most agent loops do when an exact tokenizer isn't available.

use crate::Message;

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Fixed per-message overhead (role markers, separators) in tokens.
const MESSAGE_OVERHEAD_TOKENS: usize = 3;

/// Counts model-countable units in a piece of text.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;

    /// Tokens consumed by a message: its content, tool-call names and
    /// arguments, and a small fixed overhead.
    fn count_message(&self, message: &Message) -> usize {
        let mut total = MESSAGE_OVERHEAD_TOKENS;
        if let Some(ref content) = message.content {
            total += self.count_tokens(content);
        }
        if let Some(ref calls) = message.tool_calls {
            for call in calls {
                total += self.count_tokens(&call.function.name);
                total += self.count_tokens(&call.function.arguments);
            }
        }
        total
    }

    fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

/// Character-ratio token estimator.
#[derive(Debug, Clone)]
pub struct CharEstimate {
    chars_per_token: f64,
}

impl CharEstimate {
    /// Create an estimator with a calibrated chars-per-token ratio.
    /// Non-positive ratios fall back to the default.
    pub fn new(chars_per_token: f64) -> Self {
        let cpt = if chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self {
            chars_per_token: cpt,
        }
    }
}

impl Default for CharEstimate {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenCounter for CharEstimate {
    fn count_tokens(&self, text: &str) -> usize {
        (text.chars().count() as f64 / self.chars_per_token).ceil() as usize
    }
}
