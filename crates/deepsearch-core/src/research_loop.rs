//! Reference driver for the retrieval loop.
//!
//! Planning -> Executing -> CoverageUpdate -> TerminationCheck, repeated until
//! a termination guard fires, the planner asks to stop or runs dry, or the
//! iteration cap is reached. Actions run strictly one at a time.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::config::Config;
use crate::error::DeepSearchError;
use crate::executor::{ActionExecutor, ActionOutcome};
use crate::facets::{
    FacetManager, FacetOptions, all_required_facets_covered, facet_coverage_ratio,
};
use crate::heuristics::HeuristicTables;
use crate::metrics::{record_action_metrics, record_loop_stop};
use crate::providers::{DynLlmClient, DynPageFetcher, DynReranker, DynSearchProvider};
use crate::search_results::SearchResultProcessor;
use crate::state::{AgentState, Budget, PlannedAction};
use crate::termination::{
    FreshnessBoost, LexicalTimeSensitivity, StopReason, TimeSensitivityClassifier,
    maybe_freshness_boost, stop_reason,
};
use crate::trace::TraceCollector;
use crate::tracker::DynCallTracker;

pub const DEFAULT_MAX_ITERATIONS: usize = 24;

/// Supplies the next action; `None` means the planner has nothing left to try.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn next_action(&self, state: &AgentState) -> anyhow::Result<Option<PlannedAction>>;
}

/// Replays a fixed list of actions in order.
#[derive(Debug, Default)]
pub struct ScriptedPlanner {
    actions: Mutex<VecDeque<PlannedAction>>,
}

impl ScriptedPlanner {
    pub fn new(actions: impl IntoIterator<Item = PlannedAction>) -> Self {
        Self {
            actions: Mutex::new(actions.into_iter().collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.actions.lock().map(|queue| queue.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn next_action(&self, _state: &AgentState) -> anyhow::Result<Option<PlannedAction>> {
        let mut queue = self
            .actions
            .lock()
            .map_err(|_| anyhow::anyhow!("scripted planner queue poisoned"))?;
        Ok(queue.pop_front())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    Termination(StopReason),
    PlannerStop,
    PlannerExhausted,
    IterationCap,
}

impl LoopStop {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStop::Termination(StopReason::TimeBudgetExhausted) => "time_budget",
            LoopStop::Termination(StopReason::RequiredFacetsCovered) => "facets_covered",
            LoopStop::Termination(StopReason::UnproductiveSearch) => "unproductive",
            LoopStop::Termination(StopReason::TimeWithSufficientCoverage) => "time_with_coverage",
            LoopStop::PlannerStop => "planner_stop",
            LoopStop::PlannerExhausted => "planner_exhausted",
            LoopStop::IterationCap => "iteration_cap",
        }
    }
}

impl fmt::Display for LoopStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopStop::Termination(reason) => write!(f, "{reason}"),
            LoopStop::PlannerStop => f.write_str("planner requested stop"),
            LoopStop::PlannerExhausted => f.write_str("planner had no further actions"),
            LoopStop::IterationCap => f.write_str("iteration cap reached"),
        }
    }
}

#[derive(Debug)]
pub struct LoopOutcome {
    pub run_id: String,
    pub state: AgentState,
    pub stop: LoopStop,
    pub iterations: usize,
    pub trace: TraceCollector,
}

pub struct RetrievalLoop {
    executor: ActionExecutor,
    facets: FacetManager,
    llm: DynLlmClient,
    facet_options: FacetOptions,
    classifier: Arc<dyn TimeSensitivityClassifier>,
    max_iterations: usize,
    freshness_boost: bool,
}

impl RetrievalLoop {
    pub fn new(executor: ActionExecutor, llm: DynLlmClient) -> Self {
        Self {
            executor,
            facets: FacetManager::default(),
            llm,
            facet_options: FacetOptions::default(),
            classifier: Arc::new(LexicalTimeSensitivity::default()),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            freshness_boost: true,
        }
    }

    /// Wire providers with the tables, limits and policies from `config`.
    pub fn from_config(
        config: &Config,
        search: DynSearchProvider,
        fetcher: DynPageFetcher,
        reranker: DynReranker,
        llm: DynLlmClient,
        tracker: Option<DynCallTracker>,
    ) -> Result<Self, DeepSearchError> {
        let tables = Arc::new(HeuristicTables::with_overrides(&config.heuristics));
        let mut executor = ActionExecutor::new(search, fetcher, reranker)
            .with_processor(SearchResultProcessor::new(&tables)?)
            .with_failure_policy(config.loop_settings.provider_failures);
        if let Some(tracker) = tracker {
            executor = executor.with_tracker(tracker);
        }
        if let (Some(provider), Some(model)) = (&config.rerank.provider, &config.rerank.model) {
            executor = executor.with_rerank_model(provider.as_str(), model.as_str());
        }

        Ok(Self {
            executor,
            facets: FacetManager::new(tables),
            llm,
            facet_options: config.facets.clone(),
            classifier: Arc::new(LexicalTimeSensitivity::default()),
            max_iterations: usize::from(config.loop_settings.max_iterations),
            freshness_boost: config.loop_settings.freshness_boost,
        })
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn TimeSensitivityClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_freshness_boost(mut self, enabled: bool) -> Self {
        self.freshness_boost = enabled;
        self
    }

    pub fn facet_manager(&self) -> &FacetManager {
        &self.facets
    }

    pub async fn run(
        &self,
        question: &str,
        budget: Budget,
        planner: &dyn Planner,
    ) -> Result<LoopOutcome, DeepSearchError> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("retrieval_loop", run_id = %run_id);
        self.run_inner(run_id.clone(), question, budget, planner)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: String,
        question: &str,
        budget: Budget,
        planner: &dyn Planner,
    ) -> Result<LoopOutcome, DeepSearchError> {
        info!(%question, ?budget, "retrieval loop started");

        let mut state = AgentState::new(question, budget);
        let mut trace = TraceCollector::new();

        let facets = self
            .facets
            .extract_facets(self.llm.as_ref(), question, &self.facet_options)
            .await;
        trace.record(
            0,
            "FACETS",
            facets
                .iter()
                .map(|facet| facet.name.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        );
        state.replace_facets(facets);

        let mut boost_attempted = false;
        let mut iterations = 0;

        let stop = loop {
            if iterations >= self.max_iterations {
                break LoopStop::IterationCap;
            }
            iterations += 1;

            let Some(action) = planner
                .next_action(&state)
                .await
                .map_err(|err| DeepSearchError::Planner(format!("{err:#}")))?
            else {
                trace.record(iterations, "PLAN", "planner returned no action");
                break LoopStop::PlannerExhausted;
            };

            let started = Instant::now();
            let outcome = self.executor.execute(&mut state, &action).await?;
            let duration_ms = started.elapsed().as_millis() as u64;
            record_action_metrics(
                action.kind(),
                outcome.status(),
                duration_ms,
                outcome.passages_added(),
            );
            trace.record(iterations, action.kind(), outcome.to_string());

            if matches!(outcome, ActionOutcome::Stopped) {
                break LoopStop::PlannerStop;
            }

            self.refresh_coverage(&mut state);

            if self.freshness_boost && !boost_attempted && state.metrics.searches > 0 {
                boost_attempted = true;
                let boost =
                    maybe_freshness_boost(&mut state, self.classifier.as_ref(), &self.executor)
                        .await;
                if let FreshnessBoost::Boosted { added } = boost {
                    trace.record(
                        iterations,
                        "FRESHNESS",
                        format!("freshness search added {added} passage(s)"),
                    );
                    self.refresh_coverage(&mut state);
                } else {
                    debug!(?boost, "freshness boost not applied");
                }
            }

            let required_covered = all_required_facets_covered(&state.facets);
            let ratio = facet_coverage_ratio(&state.facets);
            debug!(
                iteration = iterations,
                passages = state.passages.len(),
                required_covered,
                ratio,
                "termination check"
            );
            if let Some(reason) = stop_reason(&state, required_covered, ratio) {
                break LoopStop::Termination(reason);
            }
        };

        record_loop_stop(stop.as_str(), iterations);
        trace.record(iterations, "STOP", stop.to_string());
        info!(
            stop = stop.as_str(),
            iterations,
            passages = state.passages.len(),
            searches = state.metrics.searches,
            fetches = state.metrics.fetches,
            reranks = state.metrics.reranks,
            "retrieval loop finished"
        );

        Ok(LoopOutcome {
            run_id,
            state,
            stop,
            iterations,
            trace,
        })
    }

    fn refresh_coverage(&self, state: &mut AgentState) {
        let refreshed = self
            .facets
            .update_facet_coverage(&state.facets, &state.passages);
        state.replace_facets(refreshed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::stub::{CannedLlm, OrderReranker, StaticFetcher, StaticSearch};

    #[tokio::test]
    async fn scripted_planner_drains_in_order() {
        let planner = ScriptedPlanner::new([PlannedAction::search("a"), PlannedAction::Stop]);
        let state = AgentState::new("q", Budget::default());
        assert_eq!(
            planner.next_action(&state).await.unwrap(),
            Some(PlannedAction::search("a"))
        );
        assert_eq!(planner.remaining(), 1);
        assert_eq!(planner.next_action(&state).await.unwrap(), Some(PlannedAction::Stop));
        assert_eq!(planner.next_action(&state).await.unwrap(), None);
    }

    #[tokio::test]
    async fn iteration_cap_bounds_the_loop() {
        let executor = ActionExecutor::new(
            Arc::new(StaticSearch::default()),
            Arc::new(StaticFetcher::new()),
            Arc::new(OrderReranker::Identity),
        );
        let retrieval = RetrievalLoop::new(executor, Arc::new(CannedLlm::failing()))
            .with_max_iterations(3)
            .with_freshness_boost(false);
        let planner = ScriptedPlanner::new(std::iter::repeat_n(PlannedAction::rerank(None), 10));

        let outcome = retrieval
            .run("How do transistors work?", Budget::default(), &planner)
            .await
            .unwrap();

        assert_eq!(outcome.stop, LoopStop::IterationCap);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.state.metrics.reranks, 3);
        assert_eq!(planner.remaining(), 7);
    }
}
