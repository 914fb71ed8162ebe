//! DeepSearch core: an agentic retrieval loop.
//!
//! Given a question, the loop alternates between web search, page fetches and
//! evidence reranking under a search/fetch/time budget, tracks which facets of
//! the question have supporting sources, and enforces source-domain diversity.
//! Search, fetch, rerank and LLM providers are injected through the traits in
//! [`providers`].

mod chunking;
mod config;
mod dates;
mod domain;
mod error;
mod executor;
mod facets;
mod heuristics;
mod metrics;
pub mod providers;
mod research_loop;
mod search_results;
mod state;
mod telemetry;
mod termination;
mod trace;
mod tracker;

pub use chunking::{ChunkOptions, chunk_text};
pub use config::{BudgetConfig, Config, ConfigLoader, LoggingConfig, LoopConfig, RerankConfig};
pub use dates::{DateExtractor, HeuristicDateExtractor, parse_date_value};
pub use domain::{domain_key, registrable_domain};
pub use error::DeepSearchError;
pub use executor::{
    ActionExecutor, ActionOutcome, FreshnessSearch, ProviderFailurePolicy, url_hash,
};
pub use facets::{
    FacetManager, FacetOptions, all_required_facets_covered, distinct_domains,
    facet_coverage_ratio, fallback_facet, has_domain_diversity,
};
pub use heuristics::{HeuristicOverrides, HeuristicTables};
pub use research_loop::{LoopOutcome, LoopStop, Planner, RetrievalLoop, ScriptedPlanner};
pub use search_results::SearchResultProcessor;
pub use state::{
    AgentState, Budget, Facet, LoopMetrics, Passage, PlannedAction, SearchHistory, TimeRange,
};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use termination::{
    FreshnessBoost, LexicalTimeSensitivity, StopReason, TimeSensitivityClassifier,
    maybe_freshness_boost, maybe_freshness_boost_at, should_stop_loop, stop_reason,
    stop_reason_at,
};
pub use trace::{TraceCollector, TraceEvent, TraceSummary, persist_trace};
pub use tracker::{ApiCallTracker, CallLog, CallRecord, ChannelCallTracker, DynCallTracker};
