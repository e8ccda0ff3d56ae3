//! End-to-end compaction through the public API with a scripted endpoint.

use futures::FutureExt;
use recap::api::{ChatEndpoint, ChatResponse, EndpointFuture, ModelInfo, RequestKind, ResponseKind};
use recap::compaction::{CollectingSink, Compactor, PatchLocation, PatchResult};
use recap::config::CompactionConfig;
use recap::context::{ConversationRenderer, TokenCounter};
use recap::error::CompactionError;
use recap::history::restore::restore_summaries;
use recap::history::snapshot::{PendingTurn, Snapshot};
use recap::history::{Conversation, PromptContext, Round, RoundId, ToolInvocation, ToolResult};
use recap::{ChatRequest, ToolDef};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Replays queued responses in order and records every request body.
struct ScriptedEndpoint {
    responses: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicUsize,
}

impl ScriptedEndpoint {
    fn new(responses: impl IntoIterator<Item = ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// All message contents of the last request, joined.
    fn last_prompt(&self) -> String {
        let requests = self.requests.lock().unwrap();
        let last = requests.last().expect("no request sent");
        last.messages
            .iter()
            .filter_map(|m| m.content.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ChatEndpoint for ScriptedEndpoint {
    fn complete<'a>(&'a self, kind: RequestKind, request: &'a ChatRequest) -> EndpointFuture<'a> {
        assert_eq!(kind, RequestKind::Summarization);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let next = self.responses.lock().unwrap().pop_front();
        async move { next.ok_or_else(|| "script exhausted".to_string()) }.boxed()
    }
}

/// Every non-empty text costs the same number of tokens.
struct FixedTokens(usize);

impl TokenCounter for FixedTokens {
    fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() { 0 } else { self.0 }
    }
}

fn target() -> ModelInfo {
    ModelInfo::new("anthropic/claude-sonnet-4", 100_000)
}

fn summary_of(conversation: &Conversation, id: &str) -> Option<String> {
    conversation
        .round(&RoundId::new(id))
        .and_then(|r| r.summary.clone())
}

#[tokio::test]
async fn summarizes_prior_turn() {
    let endpoint = ScriptedEndpoint::new([ChatResponse::success("S1").with_request_id("gen-1")]);
    let counter = FixedTokens(10);
    let renderer = ConversationRenderer::new(&counter);
    let sink = CollectingSink::new();
    let compactor = Compactor::new(&endpoint, &renderer, &counter, CompactionConfig::default())
        .with_telemetry(&sink);

    let mut conv = Conversation::new("conv-1");
    conv.push_turn(
        "t1",
        "why does the build fail?",
        vec![
            Round::new("r1", "")
                .with_tool_call(ToolInvocation::new("c1", "read_file", r#"{"path":"Cargo.toml"}"#))
                .with_tool_result("c1", ToolResult::ok("[package]")),
        ],
    )
    .unwrap();

    let done = {
        let mut ctx = PromptContext::new(&mut conv, "now fix it");
        compactor.compact(&mut ctx, &target(), &[], false).await.unwrap()
    };

    assert_eq!(done.summary, "S1");
    assert_eq!(done.covered_round, RoundId::new("r1"));
    assert_eq!(done.patch, PatchResult::Installed(PatchLocation::Turn("t1".into())));
    assert_eq!(summary_of(&conv, "r1").as_deref(), Some("S1"));
    assert_eq!(endpoint.calls(), 1);

    let prompt = endpoint.last_prompt();
    assert!(prompt.contains("why does the build fail?"));
    assert!(prompt.contains("[package]"));
    assert!(!prompt.contains("now fix it"));

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].property("outcome"), Some("success"));
    assert_eq!(events[0].property("conversationId"), Some("conv-1"));
    assert_eq!(events[0].property("responseId"), Some("gen-1"));
    assert_eq!(events[0].property("lastUsedTool"), Some("read_file"));
    assert_eq!(events[0].measurement("numRounds"), Some(1.0));
}

#[tokio::test]
async fn in_progress_turn_keeps_its_last_round() {
    let endpoint = ScriptedEndpoint::new([ChatResponse::success("S")]);
    let counter = FixedTokens(10);
    let renderer = ConversationRenderer::new(&counter);
    let compactor = Compactor::new(&endpoint, &renderer, &counter, CompactionConfig::default());

    let mut conv = Conversation::new("c");
    let mut ctx = PromptContext::new(&mut conv, "refactor the parser");
    for (id, text) in [("p1", "step one"), ("p2", "step two"), ("p3", "step three")] {
        ctx.push_round(Round::new(id, text)).unwrap();
    }

    let done = compactor.compact(&mut ctx, &target(), &[], false).await.unwrap();
    assert_eq!(done.covered_round, RoundId::new("p2"));
    assert_eq!(done.patch, PatchResult::Installed(PatchLocation::PendingTurn));
    drop(ctx);

    assert_eq!(summary_of(&conv, "p2").as_deref(), Some("S"));
    assert_eq!(summary_of(&conv, "p1"), None);
    assert_eq!(summary_of(&conv, "p3"), None);

    let prompt = endpoint.last_prompt();
    assert!(prompt.contains("step one"));
    assert!(prompt.contains("step two"));
    assert!(!prompt.contains("step three"));
}

#[tokio::test]
async fn builds_on_existing_summary() {
    let endpoint = ScriptedEndpoint::new([ChatResponse::success("S2")]);
    let counter = FixedTokens(10);
    let renderer = ConversationRenderer::new(&counter);
    let compactor = Compactor::new(&endpoint, &renderer, &counter, CompactionConfig::default());

    let mut conv = Conversation::new("c");
    conv.push_turn("t1", "first task", vec![Round::new("r1", "old details")])
        .unwrap();
    conv.push_turn("t2", "second task", vec![Round::new("r2", "new details")])
        .unwrap();
    conv.rounds.patch_summary(&RoundId::new("r1"), "OLD");

    let mut ctx = PromptContext::new(&mut conv, "third task");
    let done = compactor.compact(&mut ctx, &target(), &[], false).await.unwrap();
    assert_eq!(done.covered_round, RoundId::new("r2"));

    let prompt = endpoint.last_prompt();
    assert!(prompt.contains("OLD"));
    assert!(prompt.contains("new details"));
    assert!(!prompt.contains("old details"));
}

#[tokio::test]
async fn oversized_summary_is_rejected() {
    let endpoint = ScriptedEndpoint::new([
        ChatResponse::success("a very long summary").with_request_id("gen-2"),
    ]);
    let counter = FixedTokens(10);
    let renderer = ConversationRenderer::new(&counter);
    let sink = CollectingSink::new();
    let config = CompactionConfig::default().with_summary_token_budget(5);
    let compactor = Compactor::new(&endpoint, &renderer, &counter, config).with_telemetry(&sink);

    let mut conv = Conversation::new("c");
    conv.push_turn("t1", "q", vec![Round::new("r1", "answer")]).unwrap();
    let err = {
        let mut ctx = PromptContext::new(&mut conv, "next");
        compactor.compact(&mut ctx, &target(), &[], false).await.unwrap_err()
    };

    assert!(matches!(err, CompactionError::TooLarge { tokens: 10, budget: 5 }));
    assert_eq!(summary_of(&conv, "r1"), None);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].property("outcome"), Some("tooLarge"));
    assert_eq!(events[0].property("responseId"), Some("gen-2"));
}

#[tokio::test]
async fn prompt_over_budget_never_calls_endpoint() {
    let endpoint = ScriptedEndpoint::new([]);
    let counter = FixedTokens(10);
    let renderer = ConversationRenderer::new(&counter);
    let sink = CollectingSink::new();
    let compactor = Compactor::new(&endpoint, &renderer, &counter, CompactionConfig::default())
        .with_telemetry(&sink);

    let mut conv = Conversation::new("c");
    conv.push_turn("t1", "q", vec![Round::new("r1", "answer")]).unwrap();
    let mut ctx = PromptContext::new(&mut conv, "next");
    let err = compactor
        .compact(&mut ctx, &ModelInfo::new("openai/gpt-4o", 8), &[], false)
        .await
        .unwrap_err();

    assert!(matches!(err, CompactionError::BudgetExceeded { budget: 8, .. }));
    assert_eq!(endpoint.calls(), 0);
    assert_eq!(sink.events()[0].property("outcome"), Some("budgetExceeded"));
}

#[tokio::test]
async fn nothing_to_summarize_is_silent() {
    let endpoint = ScriptedEndpoint::new([ChatResponse::success("unused")]);
    let counter = FixedTokens(10);
    let renderer = ConversationRenderer::new(&counter);
    let sink = CollectingSink::new();
    let compactor = Compactor::new(&endpoint, &renderer, &counter, CompactionConfig::default())
        .with_telemetry(&sink);

    let mut conv = Conversation::new("c");
    let mut ctx = PromptContext::new(&mut conv, "q");
    ctx.push_round(Round::new("p1", "only round")).unwrap();

    let err = compactor.compact(&mut ctx, &target(), &[], false).await.unwrap_err();
    assert!(matches!(err, CompactionError::NothingToSummarize));
    assert_eq!(endpoint.calls(), 0);
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn upstream_kinds_become_outcome_tags() {
    let endpoint = ScriptedEndpoint::new([
        ChatResponse::failure(ResponseKind::Filtered, "blocked"),
        ChatResponse::failure(ResponseKind::QuotaExceeded, "out of credits"),
    ]);
    let counter = FixedTokens(10);
    let renderer = ConversationRenderer::new(&counter);
    let sink = CollectingSink::new();
    let compactor = Compactor::new(&endpoint, &renderer, &counter, CompactionConfig::default())
        .with_telemetry(&sink);

    let mut conv = Conversation::new("c");
    conv.push_turn("t1", "q", vec![Round::new("r1", "answer")]).unwrap();
    let mut ctx = PromptContext::new(&mut conv, "next");
    for _ in 0..2 {
        assert!(compactor.compact(&mut ctx, &target(), &[], false).await.is_err());
    }
    drop(ctx);

    let outcomes: Vec<String> = sink
        .events()
        .iter()
        .filter_map(|e| e.property("outcome").map(str::to_string))
        .collect();
    assert_eq!(outcomes, ["filtered", "quotaExceeded"]);
    assert_eq!(summary_of(&conv, "r1"), None);
}

#[tokio::test]
async fn transport_failure_is_request_failed() {
    let endpoint = ScriptedEndpoint::new([]);
    let counter = FixedTokens(10);
    let renderer = ConversationRenderer::new(&counter);
    let sink = CollectingSink::new();
    let compactor = Compactor::new(&endpoint, &renderer, &counter, CompactionConfig::default())
        .with_telemetry(&sink);

    let mut conv = Conversation::new("c");
    conv.push_turn("t1", "q", vec![Round::new("r1", "answer")]).unwrap();
    let mut ctx = PromptContext::new(&mut conv, "next");
    let err = compactor.compact(&mut ctx, &target(), &[], false).await.unwrap_err();

    assert!(matches!(err, CompactionError::RequestFailed(ref m) if m == "script exhausted"));
    assert_eq!(sink.events()[0].property("outcome"), Some("requestFailed"));
    assert_eq!(sink.events()[0].property("responseId"), Some(""));
}

#[tokio::test]
async fn offered_tools_are_normalized_and_disabled() {
    let endpoint = ScriptedEndpoint::new([ChatResponse::success("S")]);
    let counter = FixedTokens(10);
    let renderer = ConversationRenderer::new(&counter);
    let compactor = Compactor::new(&endpoint, &renderer, &counter, CompactionConfig::default());

    let tools = vec![
        ToolDef::new("grep", "Search files", serde_json::json!({"type": "object"})),
        ToolDef::new("bad name!", "Broken", serde_json::json!({"type": "object"})),
    ];
    let mut conv = Conversation::new("c");
    conv.push_turn("t1", "q", vec![Round::new("r1", "answer")]).unwrap();
    let mut ctx = PromptContext::new(&mut conv, "next");
    compactor.compact(&mut ctx, &target(), &tools, true).await.unwrap();

    let requests = endpoint.requests.lock().unwrap();
    let body = serde_json::to_value(&requests[0]).unwrap();
    assert_eq!(body["tool_choice"], "none");
    assert_eq!(body["tools"].as_array().unwrap().len(), 1);
    assert_eq!(body["tools"][0]["function"]["name"], "grep");
    assert_eq!(body["messages"][0]["cache_control"]["type"], "ephemeral");
}

#[tokio::test]
async fn persisted_summary_survives_reload() {
    let endpoint = ScriptedEndpoint::new([ChatResponse::success("S1")]);
    let counter = FixedTokens(10);
    let renderer = ConversationRenderer::new(&counter);
    let compactor = Compactor::new(&endpoint, &renderer, &counter, CompactionConfig::default());

    let mut conversation = Conversation::new("c");
    conversation
        .push_turn("t1", "q", vec![Round::new("r1", "answer")])
        .unwrap();
    let mut snapshot = Snapshot {
        conversation,
        pending: PendingTurn {
            query: "next".into(),
            ..Default::default()
        },
    };

    let done = {
        let mut ctx = snapshot.prompt_context();
        compactor.compact(&mut ctx, &target(), &[], false).await.unwrap()
    };
    snapshot.conversation.turns[0].record_summary(done.persisted());

    // A host that drops render-pass state keeps only the turn metadata.
    let mut reloaded = snapshot.clone();
    let round = Round::new("r1", "answer");
    reloaded.conversation.rounds = vec![round].try_into().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    reloaded.save(&path).unwrap();
    let mut loaded = Snapshot::load(&path).unwrap();
    assert_eq!(summary_of(&loaded.conversation, "r1"), None);

    assert_eq!(restore_summaries(&mut loaded.conversation), 1);
    assert_eq!(summary_of(&loaded.conversation, "r1").as_deref(), Some("S1"));
}
