//! Compact a saved agent conversation with OpenRouter.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Summarize a snapshot in place and print the summary
//! recap compact --snapshot conversation.json
//!
//! # Target model, cache breakpoints, and an open notebook
//! recap compact --snapshot conversation.json --output compacted.json \
//!   --model anthropic/claude-sonnet-4 --max-prompt-tokens 200000 \
//!   --cache-breakpoints --notebook analysis.ipynb
//!
//! # Show what would be summarized, without any network call
//! recap inspect --snapshot conversation.json
//! ```

use clap::{Args, Parser, Subcommand};
use recap::api::ModelInfo;
use recap::compaction::{
    CompactionStats, Compactor, LoggingHandler, PatchLocation, ProgressSink, ProgressUpdate,
    TracingTelemetrySink,
};
use recap::config::CompactionConfig;
use recap::context::notebook::{OpenNotebooks, WorkspaceResolver};
use recap::context::{CharEstimate, ConversationRenderer, RoundSelector};
use recap::history::restore::restore_summaries;
use recap::history::snapshot::Snapshot;
use recap::{OpenRouterClient, ToolDef};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Compact a saved agent conversation with OpenRouter.
#[derive(Parser)]
#[command(name = "recap", version)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// JSON file with compaction settings; flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize a snapshot and install the summary
    Compact(CompactArgs),
    /// Print the selection and telemetry counters as JSON
    Inspect {
        /// Conversation snapshot to read
        #[arg(long)]
        snapshot: PathBuf,
    },
}

#[derive(Args)]
struct CompactArgs {
    /// Conversation snapshot to read
    #[arg(long)]
    snapshot: PathBuf,

    /// Where to write the patched snapshot (default: in place)
    #[arg(long)]
    output: Option<PathBuf>,

    // ── Target model ───────────────────────────────────────────
    /// Model the next prompt is for
    #[arg(long, default_value = "anthropic/claude-sonnet-4")]
    model: String,

    /// Prompt budget of the target model, in tokens
    #[arg(long, default_value_t = 128_000)]
    max_prompt_tokens: usize,

    /// Model that writes the summary (default: the target model)
    #[arg(long)]
    summary_model: Option<String>,

    /// Reject summaries longer than this many tokens
    #[arg(long)]
    summary_token_budget: Option<usize>,

    /// Mark prompt-cache breakpoints on the summarization prompt
    #[arg(long)]
    cache_breakpoints: bool,

    // ── Inputs ─────────────────────────────────────────────────
    /// JSON file with the tool definitions offered to the target model
    #[arg(long)]
    tools: Option<PathBuf>,

    /// Notebook open in the workspace (repeatable)
    #[arg(long = "notebook")]
    notebooks: Vec<String>,

    /// Root that notebook paths resolve against
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// OpenRouter API key
    #[arg(long, env = "OPENROUTER_KEY", hide_env_values = true)]
    api_key: String,
}

/// Prints request progress to stderr.
struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn on_progress(&self, update: ProgressUpdate) {
        match update {
            ProgressUpdate::InProgress { message } => eprintln!("  {message}..."),
            ProgressUpdate::Finished => eprintln!("  done"),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Compact(args) => compact(cli.config.as_deref(), args).await,
        Command::Inspect { snapshot } => inspect(&snapshot),
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "recap=debug" } else { "recap=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn compact(config_path: Option<&Path>, args: CompactArgs) -> Result<(), String> {
    let mut config = match config_path {
        Some(path) => CompactionConfig::from_json_file(path)?,
        None => CompactionConfig::default(),
    };
    if let Some(model) = args.summary_model {
        config = config.with_model(model);
    }
    if let Some(budget) = args.summary_token_budget {
        config = config.with_summary_token_budget(budget);
    }

    let mut snapshot = Snapshot::load(&args.snapshot)?;
    let restored = restore_summaries(&mut snapshot.conversation);
    debug!("Restored {restored} summary(ies) from turn metadata");

    let tools = match args.tools {
        Some(ref path) => load_tools(path)?,
        None => Vec::new(),
    };

    let resolver = WorkspaceResolver::new(&args.workspace);
    let mut notebooks = OpenNotebooks::new();
    for raw in &args.notebooks {
        notebooks.open_file(&resolver, raw)?;
    }

    let client =
        OpenRouterClient::with_headers(args.api_key, "https://github.com/recap-rs/recap", "recap")?;
    let counter = CharEstimate::new(config.chars_per_token);
    let renderer = ConversationRenderer::new(&counter);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let compactor = Compactor::new(&client, &renderer, &counter, config)
        .with_telemetry(&TracingTelemetrySink)
        .with_event_handler(&LoggingHandler)
        .with_notebooks(&resolver, &notebooks)
        .with_progress(Arc::new(StderrProgress))
        .with_cancellation(cancel);

    let target = ModelInfo::new(args.model, args.max_prompt_tokens);
    let done = {
        let mut ctx = snapshot.prompt_context();
        compactor
            .compact(&mut ctx, &target, &tools, args.cache_breakpoints)
            .await
            .map_err(|e| e.to_string())?
    };

    // Rounds of persisted turns keep their summary only through turn metadata.
    if let Some(PatchLocation::Turn(turn_id)) = done.patch.location()
        && let Some(turn) = snapshot
            .conversation
            .turns
            .iter_mut()
            .find(|t| &t.id == turn_id)
    {
        turn.record_summary(done.persisted());
    }

    let output = args.output.as_deref().unwrap_or(&args.snapshot);
    snapshot.save(output)?;
    info!("Wrote {}", output.display());

    println!("{}", done.summary);
    Ok(())
}

fn inspect(path: &Path) -> Result<(), String> {
    let mut snapshot = Snapshot::load(path)?;
    restore_summaries(&mut snapshot.conversation);
    let ctx = snapshot.prompt_context();

    let stats = CompactionStats::from_context(&ctx);
    let selection = match RoundSelector::select(&ctx) {
        Ok(s) => serde_json::json!({
            "rule": format!("{:?}", s.rule),
            "coveredRound": s.covered_round.as_str(),
            "pendingRounds": s.pending_rounds.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
            "isContinuation": s.is_continuation,
        }),
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    };
    let report = serde_json::json!({
        "conversationId": stats.conversation_id,
        "selection": selection,
        "numRounds": stats.total_rounds,
        "numRoundsSinceLastSummarization": stats.rounds_since_last_summary,
        "lastUsedTool": stats.last_used_tool,
        "isDuringToolCalling": stats.during_tool_calling,
    });

    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| format!("failed to serialize report: {e}"))?;
    println!("{json}");
    Ok(())
}

/// Load tool definitions from a JSON array in OpenAI function-calling format.
fn load_tools(path: &Path) -> Result<Vec<ToolDef>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read tools file '{}': {e}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse tools file '{}': {e}", path.display()))
}
