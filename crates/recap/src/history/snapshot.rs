//! JSON snapshot of a conversation and its in-progress turn.
//!
//! The CLI reads and writes this format. A snapshot holds everything needed
//! to rebuild a [`PromptContext`]: the persisted [`Conversation`] (whose
//! arena also stores the pending rounds) and the [`PendingTurn`] fields.

use super::{Conversation, PromptContext, RoundId, ToolResult};
use crate::error::HistoryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// The in-progress turn, minus the round bodies (those live in the arena).
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PendingTurn {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub rounds: Vec<RoundId>,
    #[serde(default)]
    pub tool_results: BTreeMap<String, ToolResult>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Snapshot {
    pub conversation: Conversation,
    #[serde(default)]
    pub pending: PendingTurn,
}

impl Snapshot {
    /// Load a snapshot from a JSON file.
    ///
    /// Round ids listed by persisted turns and by the pending turn must refer
    /// to rounds stored in the conversation.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read snapshot '{}': {e}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .map_err(|e| format!("failed to parse snapshot '{}': {e}", path.display()))?;
        if let Some(missing) = snapshot
            .pending
            .rounds
            .iter()
            .find(|id| !snapshot.conversation.rounds.contains(id))
        {
            let err = HistoryError::UnknownRound(missing.clone());
            return Err(format!(
                "invalid pending turn in snapshot '{}': {err}",
                path.display()
            ));
        }
        Ok(snapshot)
    }

    /// Write the snapshot as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize snapshot: {e}"))?;
        std::fs::write(path, json)
            .map_err(|e| format!("failed to write snapshot '{}': {e}", path.display()))
    }

    /// Build a prompt context over this snapshot.
    pub fn prompt_context(&mut self) -> PromptContext<'_> {
        let mut ctx = PromptContext::new(&mut self.conversation, self.pending.query.clone());
        ctx.tool_call_rounds = self.pending.rounds.clone();
        ctx.tool_call_results = self.pending.tool_results.clone();
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Round;

    fn sample() -> Snapshot {
        let mut conversation = Conversation::new("c1");
        conversation
            .push_turn("t1", "first", vec![Round::new("r1", "done")])
            .unwrap();
        conversation.rounds.insert(Round::new("p1", "working")).unwrap();
        Snapshot {
            conversation,
            pending: PendingTurn {
                query: "second".into(),
                rounds: vec![RoundId::new("p1")],
                tool_results: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        sample().save(&path).unwrap();

        let mut loaded = Snapshot::load(&path).unwrap();
        assert_eq!(loaded.conversation.turns.len(), 1);
        let ctx = loaded.prompt_context();
        assert_eq!(ctx.query, "second");
        assert_eq!(ctx.tool_call_rounds, vec![RoundId::new("p1")]);
    }

    #[test]
    fn load_rejects_unknown_pending_round() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        let mut snap = sample();
        snap.pending.rounds.push(RoundId::new("ghost"));
        snap.save(&path).unwrap();

        let err = Snapshot::load(&path).unwrap_err();
        assert!(err.contains("ghost"));
    }

    #[test]
    fn load_rejects_turn_naming_missing_round() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        let mut snap = sample();
        snap.conversation.turns[0].rounds.push(RoundId::new("ghost"));
        snap.save(&path).unwrap();

        let err = Snapshot::load(&path).unwrap_err();
        assert!(err.contains("failed to parse snapshot"));
        assert!(err.contains("round ghost is not part of this conversation"));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Snapshot::load(Path::new("/nonexistent/snap.json")).unwrap_err();
        assert!(err.contains("failed to read snapshot"));
    }
}
