//! Round selection: which rounds a summary replaces, and where it attaches.
//!
//! Policy, in priority order:
//!
//! 1. More than one pending round in the in-progress turn: drop the last one
//!    (presumed to be the round that overflowed the budget; it still has to
//!    run) and summarize through the new last pending round.
//! 2. At least one prior turn: summarize through the last round of the
//!    latest prior turn that has rounds. The newest user message is excluded
//!    from verbatim context (continuation) and no pending rounds are used.
//! 3. Otherwise there is nothing to summarize.
//!
//! Dropping the last pending round is a heuristic. Nothing verifies that the
//! dropped round is the one that actually exceeded the budget.

use crate::error::CompactionError;
use crate::history::{PromptContext, RoundId};

/// Which selection rule produced a [`Selection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionRule {
    DropLastPending,
    PriorTurn,
}

/// The outcome of round selection for one compaction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub rule: SelectionRule,
    /// Pending rounds to include verbatim, chronological.
    pub pending_rounds: Vec<RoundId>,
    /// The round whose `summary` field receives the result.
    pub covered_round: RoundId,
    /// Exclude the in-progress user message from the summarization input.
    pub is_continuation: bool,
}

/// Pure selection logic over a [`PromptContext`].
pub struct RoundSelector;

impl RoundSelector {
    pub fn select(ctx: &PromptContext<'_>) -> Result<Selection, CompactionError> {
        let pending = &ctx.tool_call_rounds;
        if pending.len() > 1 {
            let kept = pending[..pending.len() - 1].to_vec();
            let covered_round = kept[kept.len() - 1].clone();
            return Ok(Selection {
                rule: SelectionRule::DropLastPending,
                pending_rounds: kept,
                covered_round,
                is_continuation: ctx.is_continuation,
            });
        }

        let covered = ctx
            .history()
            .iter()
            .rev()
            .find_map(|turn| turn.rounds.last().cloned());
        match covered {
            Some(covered_round) => Ok(Selection {
                rule: SelectionRule::PriorTurn,
                pending_rounds: Vec::new(),
                covered_round,
                is_continuation: true,
            }),
            None => Err(CompactionError::NothingToSummarize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Conversation, Round};

    fn conversation_with_turns(turns: &[&[&str]]) -> Conversation {
        let mut conv = Conversation::new("c");
        for (i, rounds) in turns.iter().enumerate() {
            let rounds = rounds.iter().map(|id| Round::new(*id, "")).collect();
            conv.push_turn(format!("t{i}"), format!("q{i}"), rounds)
                .unwrap();
        }
        conv
    }

    fn push_pending(ctx: &mut PromptContext<'_>, ids: &[&str]) {
        for id in ids {
            ctx.push_round(Round::new(*id, "")).unwrap();
        }
    }

    #[test]
    fn drops_last_pending_round() {
        let mut conv = conversation_with_turns(&[&["r1"]]);
        let mut ctx = PromptContext::new(&mut conv, "now");
        push_pending(&mut ctx, &["p1", "p2", "p3"]);

        let sel = RoundSelector::select(&ctx).unwrap();
        assert_eq!(sel.rule, SelectionRule::DropLastPending);
        assert_eq!(sel.pending_rounds, vec![RoundId::new("p1"), RoundId::new("p2")]);
        assert_eq!(sel.covered_round, RoundId::new("p2"));
        assert!(!sel.is_continuation);
    }

    #[test]
    fn two_pending_rounds_keep_the_first() {
        let mut conv = Conversation::new("c");
        let mut ctx = PromptContext::new(&mut conv, "now");
        push_pending(&mut ctx, &["p1", "p2"]);

        let sel = RoundSelector::select(&ctx).unwrap();
        assert_eq!(sel.pending_rounds, vec![RoundId::new("p1")]);
        assert_eq!(sel.covered_round, RoundId::new("p1"));
    }

    #[test]
    fn falls_back_to_prior_turn() {
        let mut conv = conversation_with_turns(&[&["r1"], &["r2", "r3"]]);
        let mut ctx = PromptContext::new(&mut conv, "now");
        push_pending(&mut ctx, &["p1"]);

        let sel = RoundSelector::select(&ctx).unwrap();
        assert_eq!(sel.rule, SelectionRule::PriorTurn);
        assert!(sel.is_continuation);
        assert!(sel.pending_rounds.is_empty());
        assert_eq!(sel.covered_round, RoundId::new("r3"));
    }

    #[test]
    fn single_prior_turn_without_pending() {
        let mut conv = conversation_with_turns(&[&["r1"]]);
        let ctx = PromptContext::new(&mut conv, "now");

        let sel = RoundSelector::select(&ctx).unwrap();
        assert!(sel.is_continuation);
        assert_eq!(sel.covered_round, RoundId::new("r1"));
    }

    #[test]
    fn skips_trailing_turns_without_rounds() {
        let mut conv = conversation_with_turns(&[&["r1"], &[]]);
        let ctx = PromptContext::new(&mut conv, "now");

        let sel = RoundSelector::select(&ctx).unwrap();
        assert_eq!(sel.covered_round, RoundId::new("r1"));
    }

    #[test]
    fn nothing_to_summarize() {
        let mut conv = Conversation::new("c");
        let mut ctx = PromptContext::new(&mut conv, "now");
        assert!(matches!(
            RoundSelector::select(&ctx),
            Err(CompactionError::NothingToSummarize)
        ));

        push_pending(&mut ctx, &["p1"]);
        assert!(matches!(
            RoundSelector::select(&ctx),
            Err(CompactionError::NothingToSummarize)
        ));
    }
}
