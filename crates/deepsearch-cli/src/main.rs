use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use deepsearch_core::providers::stub::{OrderReranker, ReplayFixture};
use deepsearch_core::{
    CallLog, ChannelCallTracker, Config, ConfigLoader, LoopOutcome, PlannedAction,
    RetrievalLoop, ScriptedPlanner, TelemetryOptions, init_telemetry, persist_trace,
};
use tokio::runtime::Runtime;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "deepsearch-cli",
    version,
    about = "Replay the DeepSearch retrieval loop against canned provider responses"
)]
struct Cli {
    /// Path to a deepsearch.toml (falls back to DEEPSEARCH_CONFIG, then ./deepsearch.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the loop once from a fixture and a scripted action list.
    Run(RunArgs),
    /// Parse and validate the configuration, then print the effective budget.
    CheckConfig,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Question to resolve.
    #[arg(long)]
    question: String,

    /// JSON fixture with canned search results, pages and the facet reply.
    #[arg(long)]
    fixture: PathBuf,

    /// JSON array of planner actions, e.g. `[{"type":"SEARCH","query":"..."}]`.
    #[arg(long)]
    actions: PathBuf,

    /// Ordering applied by the stub reranker.
    #[arg(long, value_enum, default_value_t = RerankMode::Identity)]
    reranker: RerankMode,

    /// Override the configured search budget.
    #[arg(long)]
    searches: Option<u32>,

    /// Override the configured fetch budget.
    #[arg(long)]
    fetches: Option<u32>,

    /// Override the configured time budget in milliseconds.
    #[arg(long)]
    time_ms: Option<u64>,

    /// Write the step trace as JSON into this directory.
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Print the outcome as JSON instead of markdown.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RerankMode {
    Identity,
    Reverse,
    Empty,
    Failing,
}

impl From<RerankMode> for OrderReranker {
    fn from(mode: RerankMode) -> Self {
        match mode {
            RerankMode::Identity => OrderReranker::Identity,
            RerankMode::Reverse => OrderReranker::Reverse,
            RerankMode::Empty => OrderReranker::Empty,
            RerankMode::Failing => OrderReranker::Failing,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load_or_default(cli.config.clone())?;

    init_telemetry(TelemetryOptions::default().with_level(config.logging.level.clone()))?;

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(&config, args).await?,
            Command::CheckConfig => check_config(&config),
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

async fn run_command(config: &Config, args: RunArgs) -> Result<()> {
    let fixture: ReplayFixture = read_json(&args.fixture)?;
    let actions: Vec<PlannedAction> = read_json(&args.actions)?;
    info!(
        question = %args.question,
        actions = actions.len(),
        "replaying retrieval loop"
    );

    let mut budget = config.budget.to_budget();
    if let Some(searches) = args.searches {
        budget.searches = searches;
    }
    if let Some(fetches) = args.fetches {
        budget.fetches = fetches;
    }
    if let Some(time_ms) = args.time_ms {
        budget.time_ms = time_ms;
    }

    let (tracker, receiver) = ChannelCallTracker::new();
    let mut call_log = CallLog::new(receiver);

    let retrieval = RetrievalLoop::from_config(
        config,
        Arc::new(fixture.search_provider()),
        Arc::new(fixture.fetcher()),
        Arc::new(OrderReranker::from(args.reranker)),
        Arc::new(fixture.llm()),
        Some(Arc::new(tracker)),
    )?;
    let planner = ScriptedPlanner::new(actions);

    let outcome = retrieval.run(&args.question, budget, &planner).await?;
    let calls = call_log.drain();

    if let Some(dir) = &args.trace_dir {
        let path = persist_trace(dir, &outcome.run_id, outcome.trace.events())?;
        info!(path = %path.display(), "trace persisted");
    }

    if args.json {
        let report = serde_json::json!({
            "run_id": outcome.run_id,
            "stop": outcome.stop.as_str(),
            "iterations": outcome.iterations,
            "state": outcome.state,
            "trace": outcome.trace.events(),
            "calls": calls,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&outcome, calls.len());
    }
    Ok(())
}

fn check_config(config: &Config) {
    let budget = config.budget.to_budget();
    println!(
        "budget: {} search(es), {} fetch(es), {} ms",
        budget.searches, budget.fetches, budget.time_ms
    );
    println!(
        "loop: max {} iteration(s), provider failures {:?}, freshness boost {}",
        config.loop_settings.max_iterations,
        config.loop_settings.provider_failures,
        config.loop_settings.freshness_boost
    );
    println!(
        "facets: {}/{} (temperature {}, max tokens {})",
        config.facets.provider,
        config.facets.model,
        config.facets.temperature,
        config.facets.max_tokens
    );
}

fn print_report(outcome: &LoopOutcome, tracked_calls: usize) {
    println!("{}", outcome.trace.summary().render_markdown());
    println!(
        "Stopped after {} iteration(s): {}",
        outcome.iterations, outcome.stop
    );
    println!(
        "Budget left: {} search(es), {} fetch(es); {} tracked provider call(s)",
        outcome.state.budget.searches, outcome.state.budget.fetches, tracked_calls
    );

    println!("\n### Facets");
    for facet in &outcome.state.facets {
        let marker = if facet.covered { "x" } else { " " };
        let sources: Vec<&str> = facet.sources.iter().map(String::as_str).collect();
        println!("- [{marker}] {} ({})", facet.name, sources.join(", "));
    }

    println!("\n### Passages");
    for passage in &outcome.state.passages {
        println!("- {} {}", passage.id, passage.url);
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}
