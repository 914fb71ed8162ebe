//! Executes one planned action against the injected providers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::chunking::{ChunkOptions, chunk_text};
use crate::dates::{DateExtractor, HeuristicDateExtractor};
use crate::domain::registrable_domain;
use crate::error::DeepSearchError;
use crate::providers::{
    DynPageFetcher, DynReranker, DynSearchProvider, FetchResponse, RawResult,
};
use crate::search_results::{MAX_RESULTS_PER_DOMAIN, SearchResultProcessor};
use crate::state::{AgentState, Passage, PlannedAction, TimeRange};
use crate::tracker::{CallRecord, DynCallTracker};

pub const DEFAULT_SEARCH_K: usize = 12;
pub const DEFAULT_RERANK_TOP_N: usize = 8;

/// What happens when the search or rerank provider fails.
///
/// FETCH failures are always absorbed: they only ever add zero passages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFailurePolicy {
    /// Log and continue; SEARCH adds nothing, RERANK keeps the current order.
    #[default]
    Recover,
    /// Return [`DeepSearchError::Provider`] from `execute`.
    Propagate,
}

/// Result of a single `execute` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Searched { accepted: usize },
    Fetched { chunks: usize },
    Reranked { kept: usize, dropped: usize },
    Skipped { reason: &'static str },
    ProviderFailed { operation: &'static str, reason: String },
    Stopped,
}

impl ActionOutcome {
    pub fn passages_added(&self) -> usize {
        match self {
            ActionOutcome::Searched { accepted } => *accepted,
            ActionOutcome::Fetched { chunks } => *chunks,
            _ => 0,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            ActionOutcome::Searched { .. }
            | ActionOutcome::Fetched { .. }
            | ActionOutcome::Reranked { .. } => "applied",
            ActionOutcome::Skipped { .. } => "skipped",
            ActionOutcome::ProviderFailed { .. } => "failed",
            ActionOutcome::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionOutcome::Searched { accepted } => write!(f, "search added {accepted} passage(s)"),
            ActionOutcome::Fetched { chunks } => write!(f, "fetch added {chunks} chunk(s)"),
            ActionOutcome::Reranked { kept, dropped } => {
                write!(f, "rerank kept {kept}, dropped {dropped}")
            }
            ActionOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
            ActionOutcome::ProviderFailed { operation, reason } => {
                write!(f, "{operation} failed: {reason}")
            }
            ActionOutcome::Stopped => write!(f, "stop requested"),
        }
    }
}

/// Side-channel search used by the freshness boost. Does not touch budgets.
#[async_trait]
pub trait FreshnessSearch: Send + Sync {
    async fn run_search(
        &self,
        state: &mut AgentState,
        query: &str,
        time_range: TimeRange,
    ) -> Result<usize, DeepSearchError>;
}

pub struct ActionExecutor {
    search: DynSearchProvider,
    fetcher: DynPageFetcher,
    reranker: DynReranker,
    processor: SearchResultProcessor,
    date_extractor: Arc<dyn DateExtractor>,
    chunking: ChunkOptions,
    tracker: Option<DynCallTracker>,
    failure_policy: ProviderFailurePolicy,
    rerank_model: Option<(String, String)>,
}

impl ActionExecutor {
    pub fn new(search: DynSearchProvider, fetcher: DynPageFetcher, reranker: DynReranker) -> Self {
        Self {
            search,
            fetcher,
            reranker,
            processor: SearchResultProcessor::default(),
            date_extractor: Arc::new(HeuristicDateExtractor),
            chunking: ChunkOptions::default(),
            tracker: None,
            failure_policy: ProviderFailurePolicy::default(),
            rerank_model: None,
        }
    }

    pub fn with_tracker(mut self, tracker: DynCallTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_processor(mut self, processor: SearchResultProcessor) -> Self {
        self.processor = processor;
        self
    }

    pub fn with_date_extractor(mut self, extractor: Arc<dyn DateExtractor>) -> Self {
        self.date_extractor = extractor;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkOptions) -> Self {
        self.chunking = chunking;
        self
    }

    /// Provider/model label attached to tracked RERANK calls.
    pub fn with_rerank_model(
        mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        self.rerank_model = Some((provider.into(), model.into()));
        self
    }

    pub fn with_failure_policy(mut self, policy: ProviderFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[instrument(name = "executor.execute", skip(self, state, action), fields(action = action.kind()))]
    pub async fn execute(
        &self,
        state: &mut AgentState,
        action: &PlannedAction,
    ) -> Result<ActionOutcome, DeepSearchError> {
        match action {
            PlannedAction::Search {
                query,
                k,
                time_range,
            } => {
                self.execute_search(state, query.as_deref(), k.unwrap_or(DEFAULT_SEARCH_K), *time_range)
                    .await
            }
            PlannedAction::Fetch { url } => Ok(self.execute_fetch(state, url.as_deref()).await),
            PlannedAction::Rerank { top_n } => {
                self.execute_rerank(state, top_n.unwrap_or(DEFAULT_RERANK_TOP_N))
                    .await
            }
            PlannedAction::Stop | PlannedAction::Unknown => {
                info!(action = action.kind(), "planner requested stop");
                Ok(ActionOutcome::Stopped)
            }
        }
    }

    async fn execute_search(
        &self,
        state: &mut AgentState,
        query: Option<&str>,
        k: usize,
        time_range: Option<TimeRange>,
    ) -> Result<ActionOutcome, DeepSearchError> {
        let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) else {
            debug!("search skipped: no query");
            return Ok(ActionOutcome::Skipped { reason: "missing query" });
        };
        if state.budget.searches == 0 {
            debug!(%query, "search skipped: budget exhausted");
            return Ok(ActionOutcome::Skipped {
                reason: "search budget exhausted",
            });
        }

        state.budget.searches -= 1;
        state.metrics.searches += 1;
        state.search_history.push(query);

        match self.search_into(state, query, k, time_range).await {
            Ok(accepted) => {
                info!(%query, accepted, remaining = state.budget.searches, "search completed");
                Ok(ActionOutcome::Searched { accepted })
            }
            Err(err) => self.on_provider_failure("search", err),
        }
    }

    async fn search_into(
        &self,
        state: &mut AgentState,
        query: &str,
        k: usize,
        time_range: Option<TimeRange>,
    ) -> anyhow::Result<usize> {
        let raw = self.search.search(query, k, time_range).await?;
        let received = raw.len();
        let filtered = self.processor.filter_and_score(raw);
        let diverse = self.processor.retain_diverse(filtered, &state.passages);

        debug!(
            %query,
            time_range = time_range.as_ref().map(TimeRange::as_str),
            received,
            accepted = diverse.len(),
            "search results processed"
        );

        let accepted = diverse.len();
        state
            .passages
            .extend(diverse.into_iter().map(search_passage));
        Ok(accepted)
    }

    async fn execute_fetch(&self, state: &mut AgentState, url: Option<&str>) -> ActionOutcome {
        let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) else {
            debug!("fetch skipped: no url");
            return ActionOutcome::Skipped { reason: "missing url" };
        };
        if state.budget.fetches == 0 {
            debug!(%url, "fetch skipped: budget exhausted");
            return ActionOutcome::Skipped {
                reason: "fetch budget exhausted",
            };
        }

        state.budget.fetches -= 1;
        state.metrics.fetches += 1;

        let started = Instant::now();
        let response = self.fetcher.fetch_url(url).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let page = match response {
            Ok(page) => page,
            Err(err) => {
                warn!(%url, error = %err, "fetch failed; no passages added");
                self.track(
                    CallRecord::new("fetch", elapsed_ms, false)
                        .with_error(format!("{err:#}"))
                        .with_metadata(serde_json::json!({ "url": url })),
                );
                return ActionOutcome::ProviderFailed {
                    operation: "fetch",
                    reason: format!("{err:#}"),
                };
            }
        };

        let status = page.status.unwrap_or(200);
        let usable = (200..400).contains(&status)
            && page.text.as_deref().is_some_and(|text| !text.trim().is_empty());

        let passages = if usable {
            self.fetch_passages(url, &page)
        } else {
            Vec::new()
        };
        let chunks = passages.len();
        state.passages.extend(passages);

        self.track(
            CallRecord::new("fetch", elapsed_ms, usable)
                .with_metadata(serde_json::json!({
                    "url": url,
                    "status": status,
                    "chunks": chunks,
                })),
        );

        if usable {
            info!(%url, chunks, remaining = state.budget.fetches, "fetch completed");
        } else {
            warn!(%url, status, "fetch returned no usable text");
        }
        ActionOutcome::Fetched { chunks }
    }

    fn fetch_passages(&self, url: &str, page: &FetchResponse) -> Vec<Passage> {
        let published_date = self.date_extractor.extract_published_date(page);
        let source_domain = registrable_domain(url);
        let hash = url_hash(url);
        let text = page.text.as_deref().unwrap_or_default();

        chunk_text(text, self.chunking)
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| Passage {
                id: format!("fetch_{hash}_{index}"),
                text: chunk,
                url: url.to_string(),
                title: page.title.clone(),
                published_date,
                source_domain: source_domain.clone(),
            })
            .collect()
    }

    async fn execute_rerank(
        &self,
        state: &mut AgentState,
        top_n: usize,
    ) -> Result<ActionOutcome, DeepSearchError> {
        let started = Instant::now();
        let response = self
            .reranker
            .rerank(state.question(), &state.passages, top_n)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (ranked, failure) = match response {
            Ok(response) if !response.reranked_passages.is_empty() => {
                (response.reranked_passages, None)
            }
            Ok(_) => {
                debug!("reranker returned no passages; keeping current order");
                (state.passages.clone(), None)
            }
            Err(err) => {
                if self.failure_policy == ProviderFailurePolicy::Propagate {
                    self.track(
                        self.rerank_record(elapsed_ms, false, top_n, serde_json::json!({}))
                            .with_error(format!("{err:#}")),
                    );
                    return Err(DeepSearchError::provider("rerank", &err));
                }
                warn!(error = %err, "rerank failed; keeping current order");
                (state.passages.clone(), Some(format!("{err:#}")))
            }
        };

        let before = state.passages.len();
        let kept = cap_per_domain(ranked, top_n);
        let kept_count = kept.len();
        state.replace_passages(kept);
        state.metrics.reranks += 1;

        let mut record = self.rerank_record(
            elapsed_ms,
            failure.is_none(),
            top_n,
            serde_json::json!({ "input": before, "kept": kept_count }),
        );
        if let Some(error) = failure {
            record = record.with_error(error);
        }
        self.track(record);

        info!(before, kept = kept_count, "rerank applied");
        Ok(ActionOutcome::Reranked {
            kept: kept_count,
            dropped: before.saturating_sub(kept_count),
        })
    }

    fn on_provider_failure(
        &self,
        operation: &'static str,
        err: anyhow::Error,
    ) -> Result<ActionOutcome, DeepSearchError> {
        match self.failure_policy {
            ProviderFailurePolicy::Propagate => Err(DeepSearchError::provider(operation, &err)),
            ProviderFailurePolicy::Recover => {
                warn!(operation, error = %err, "provider failed; continuing");
                Ok(ActionOutcome::ProviderFailed {
                    operation,
                    reason: format!("{err:#}"),
                })
            }
        }
    }

    fn rerank_record(
        &self,
        elapsed_ms: u64,
        success: bool,
        top_n: usize,
        mut metadata: serde_json::Value,
    ) -> CallRecord {
        metadata["top_n"] = serde_json::json!(top_n);
        let record = CallRecord::new("rerank", elapsed_ms, success).with_metadata(metadata);
        match &self.rerank_model {
            Some((provider, model)) => record.with_model(provider.clone(), model.clone()),
            None => record,
        }
    }

    fn track(&self, record: CallRecord) {
        if let Some(tracker) = &self.tracker {
            tracker.track_call(record);
        }
    }
}

#[async_trait]
impl FreshnessSearch for ActionExecutor {
    async fn run_search(
        &self,
        state: &mut AgentState,
        query: &str,
        time_range: TimeRange,
    ) -> Result<usize, DeepSearchError> {
        self.search_into(state, query, DEFAULT_SEARCH_K, Some(time_range))
            .await
            .map_err(|err| DeepSearchError::provider("search", &err))
    }
}

/// Keep passages in the given order while no domain exceeds the per-domain cap.
fn cap_per_domain(ranked: Vec<Passage>, top_n: usize) -> Vec<Passage> {
    let mut per_domain: HashMap<String, usize> = HashMap::new();
    let mut kept = Vec::new();
    for passage in ranked {
        if kept.len() >= top_n {
            break;
        }
        let count = per_domain.entry(passage.domain()).or_insert(0);
        if *count < MAX_RESULTS_PER_DOMAIN {
            *count += 1;
            kept.push(passage);
        }
    }
    kept
}

fn search_passage(result: RawResult) -> Passage {
    let text = [result.snippet.as_deref(), result.title.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(result.url.as_str())
        .to_string();

    Passage {
        id: format!("search_{}", url_hash(&result.url)),
        text,
        source_domain: registrable_domain(&result.url),
        title: result.title,
        published_date: None,
        url: result.url,
    }
}

/// Stable short hash used in passage identifiers.
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}
