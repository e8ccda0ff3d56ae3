//! Installs a validated summary onto its covered round.
//!
//! The round is looked up among the in-progress turn's pending rounds first,
//! then by a reverse scan of persisted turns. Installation goes through
//! [`RoundArena::patch_summary`](crate::history::RoundArena::patch_summary),
//! so it is an overwrite and re-running it with the same text changes
//! nothing.
//!
//! A summary installed on a persisted turn's round only lives for the rest
//! of the current render pass. Callers that want it to survive store
//! [`CompactionSummary::persisted`](super::CompactionSummary::persisted) in
//! the turn's result metadata and rely on
//! [`restore_summaries`](crate::history::restore::restore_summaries).

use crate::history::{PatchStatus, PromptContext, RoundId};

/// Where the covered round was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchLocation {
    PendingTurn,
    /// A persisted turn, by id.
    Turn(String),
}

/// Result of [`HistoryPatcher::patch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchResult {
    Installed(PatchLocation),
    /// The round already carried this exact summary.
    Unchanged(PatchLocation),
    /// No round with that id in the pending rounds or any turn. Nothing was
    /// written.
    NotFound,
}

impl PatchResult {
    pub fn location(&self) -> Option<&PatchLocation> {
        match self {
            PatchResult::Installed(loc) | PatchResult::Unchanged(loc) => Some(loc),
            PatchResult::NotFound => None,
        }
    }
}

pub struct HistoryPatcher;

impl HistoryPatcher {
    pub fn patch(ctx: &mut PromptContext<'_>, round: &RoundId, summary: &str) -> PatchResult {
        let location = if ctx.tool_call_rounds.contains(round) {
            PatchLocation::PendingTurn
        } else {
            match ctx
                .history()
                .iter()
                .rev()
                .find(|turn| turn.rounds.contains(round))
            {
                Some(turn) => PatchLocation::Turn(turn.id.clone()),
                None => return PatchResult::NotFound,
            }
        };

        match ctx.conversation.rounds.patch_summary(round, summary) {
            PatchStatus::Installed => PatchResult::Installed(location),
            PatchStatus::Unchanged => PatchResult::Unchanged(location),
            PatchStatus::NotFound => PatchResult::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Conversation, Round};

    fn summary_of<'a>(ctx: &'a PromptContext<'_>, id: &str) -> Option<&'a str> {
        ctx.conversation
            .round(&RoundId::new(id))
            .and_then(|r| r.summary.as_deref())
    }

    #[test]
    fn installs_on_pending_round() {
        let mut conv = Conversation::new("c");
        let mut ctx = PromptContext::new(&mut conv, "q");
        for id in ["p1", "p2", "p3"] {
            ctx.push_round(Round::new(id, "")).unwrap();
        }

        let result = HistoryPatcher::patch(&mut ctx, &RoundId::new("p2"), "S");
        assert_eq!(result, PatchResult::Installed(PatchLocation::PendingTurn));
        assert_eq!(summary_of(&ctx, "p2"), Some("S"));
        assert_eq!(summary_of(&ctx, "p1"), None);
        assert_eq!(summary_of(&ctx, "p3"), None);
    }

    #[test]
    fn installs_on_persisted_turn() {
        let mut conv = Conversation::new("c");
        conv.push_turn("t1", "q1", vec![Round::new("r1", "")]).unwrap();
        conv.push_turn("t2", "q2", vec![Round::new("r2", "")]).unwrap();
        let mut ctx = PromptContext::new(&mut conv, "q");

        let result = HistoryPatcher::patch(&mut ctx, &RoundId::new("r1"), "S1");
        assert_eq!(result.location(), Some(&PatchLocation::Turn("t1".into())));
        assert_eq!(summary_of(&ctx, "r1"), Some("S1"));
    }

    #[test]
    fn repeated_install_is_idempotent() {
        let mut conv = Conversation::new("c");
        conv.push_turn("t1", "q1", vec![Round::new("r1", ""), Round::new("r2", "")])
            .unwrap();
        let mut ctx = PromptContext::new(&mut conv, "q");
        let id = RoundId::new("r2");

        assert!(matches!(
            HistoryPatcher::patch(&mut ctx, &id, "S"),
            PatchResult::Installed(_)
        ));
        assert!(matches!(
            HistoryPatcher::patch(&mut ctx, &id, "S"),
            PatchResult::Unchanged(_)
        ));
        assert_eq!(ctx.conversation.rounds.len(), 2);
        assert_eq!(ctx.history()[0].rounds.len(), 2);
    }

    #[test]
    fn unknown_round_is_a_no_op() {
        let mut conv = Conversation::new("c");
        conv.push_turn("t1", "q1", vec![Round::new("r1", "")]).unwrap();
        // Stored in the arena but not referenced by any turn or pending list.
        conv.rounds.insert(Round::new("orphan", "")).unwrap();
        let mut ctx = PromptContext::new(&mut conv, "q");

        assert_eq!(
            HistoryPatcher::patch(&mut ctx, &RoundId::new("orphan"), "S"),
            PatchResult::NotFound
        );
        assert_eq!(
            HistoryPatcher::patch(&mut ctx, &RoundId::new("ghost"), "S"),
            PatchResult::NotFound
        );
        assert_eq!(summary_of(&ctx, "orphan"), None);
    }
}
