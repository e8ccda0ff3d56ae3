//! Restore round summaries from persisted turn result metadata.
//!
//! Summaries installed on rounds of already-persisted turns only live for the
//! rest of the render pass that installed them. The durable copy is the
//! [`PersistedSummary`](super::PersistedSummary) a turn carries in its result
//! metadata; [`restore_summaries`] reinstalls those copies when a
//! conversation is loaded for its next turn.

use super::{Conversation, PatchStatus};
use tracing::{debug, warn};

/// Reinstall every summary recorded in turn result metadata.
///
/// Returns the number of rounds whose summary field changed. Metadata that
/// names a round missing from the conversation is skipped with a warning.
pub fn restore_summaries(conversation: &mut Conversation) -> usize {
    let mut restored = 0;
    for turn in &conversation.turns {
        let Some(ref persisted) = turn.result.summary else {
            continue;
        };
        match conversation
            .rounds
            .patch_summary(&persisted.round_id, &persisted.text)
        {
            PatchStatus::Installed => {
                debug!(
                    "Restored summary on round {} (turn {})",
                    persisted.round_id, turn.id
                );
                restored += 1;
            }
            PatchStatus::Unchanged => {}
            PatchStatus::NotFound => warn!(
                "Turn {} records a summary for unknown round {}",
                turn.id, persisted.round_id
            ),
        }
    }
    restored
}
