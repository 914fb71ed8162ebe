use std::sync::Arc;

use async_trait::async_trait;
use deepsearch_core::providers::stub::{CannedLlm, OrderReranker, StaticFetcher, StaticSearch};
use deepsearch_core::providers::{FetchResponse, RawResult};
use deepsearch_core::{
    ActionExecutor, AgentState, Budget, CallLog, ChannelCallTracker, ConfigLoader,
    DeepSearchError, Facet, FacetManager, LoopStop, PlannedAction, Planner, RetrievalLoop,
    ScriptedPlanner, SearchResultProcessor, StopReason, all_required_facets_covered,
    should_stop_loop,
};

const QUESTION: &str = "What is the latest NVIDIA chip market share?";

fn scenario_budget() -> Budget {
    Budget {
        searches: 3,
        fetches: 3,
        time_ms: 10_000,
    }
}

fn hit(url: &str, snippet: &str) -> RawResult {
    RawResult {
        url: url.to_string(),
        title: Some("NVIDIA data center update".to_string()),
        snippet: Some(snippet.to_string()),
    }
}

fn scenario_results() -> Vec<RawResult> {
    vec![
        hit("https://www.reuters.com/tech/nvidia-1", "NVIDIA's market share grew"),
        hit("https://www.reuters.com/tech/nvidia-2", "Analysts expect more supply"),
        hit("https://www.ft.com/content/abc", "The market share of rivals shrank"),
        hit("https://markets.ft.com/data/xyz", "GPU shipments rose"),
        hit("https://www.bloomberg.com/news/nvda", "Investors cheered results"),
    ]
}

#[tokio::test]
async fn single_search_covers_market_share_facet() {
    let executor = ActionExecutor::new(
        Arc::new(StaticSearch::new(scenario_results())),
        Arc::new(StaticFetcher::new()),
        Arc::new(OrderReranker::Identity),
    );
    let processor = SearchResultProcessor::default();
    let filtered = processor.filter_and_score(scenario_results());
    assert_eq!(processor.retain_diverse(filtered, &[]).len(), 5);

    let mut state = AgentState::new(QUESTION, scenario_budget());
    state.replace_facets(vec![Facet::new("market share", true)]);

    executor
        .execute(&mut state, &PlannedAction::search("nvidia market share"))
        .await
        .expect("search should succeed");
    assert_eq!(state.passages.len(), 5);
    assert_eq!(state.budget.searches, 2);

    let manager = FacetManager::default();
    let facets = manager.update_facet_coverage(&state.facets, &state.passages);
    state.replace_facets(facets);

    let facet = &state.facets[0];
    assert!(facet.covered);
    assert!(facet.sources.contains("reuters.com"));
    assert!(all_required_facets_covered(&state.facets));
}

#[tokio::test]
async fn loop_stops_once_required_facets_have_diverse_sources() {
    let retrieval = RetrievalLoop::new(
        ActionExecutor::new(
            Arc::new(StaticSearch::new(scenario_results())),
            Arc::new(StaticFetcher::new()),
            Arc::new(OrderReranker::Identity),
        ),
        Arc::new(CannedLlm::new(
            r#"{"facets":[{"name":"market share","required":true}]}"#,
        )),
    );
    let planner = ScriptedPlanner::new([
        PlannedAction::search("nvidia chip market share"),
        PlannedAction::search("unused"),
    ]);

    let outcome = retrieval
        .run(QUESTION, scenario_budget(), &planner)
        .await
        .expect("loop should finish");

    assert_eq!(
        outcome.stop,
        LoopStop::Termination(StopReason::RequiredFacetsCovered)
    );
    assert_eq!(outcome.iterations, 1);
    assert_eq!(planner.remaining(), 1);
    assert_eq!(outcome.state.metrics.searches, 1);
    // The question asks for the latest figures and nothing is dated, so the
    // freshness search spends one more unit of the search budget.
    assert_eq!(outcome.state.budget.searches, 1);
    assert_eq!(outcome.state.facets[0].sources.len(), 2);
    assert!(!outcome.trace.is_empty());
}

#[tokio::test]
async fn tracker_sees_fetch_and_rerank_only() {
    let page = FetchResponse {
        url: "https://www.anandtech.com/show/gpu".to_string(),
        text: Some("Quarterly GPU shipment analysis ".repeat(40)),
        status: Some(200),
        title: Some("GPU shipments".to_string()),
        html: None,
    };
    let (tracker, receiver) = ChannelCallTracker::new();
    let mut log = CallLog::new(receiver);

    let config = ConfigLoader::from_toml(
        "[loop]\nfreshness_boost = false\n\n[rerank]\nprovider = \"cohere\"\nmodel = \"rerank-v3\"\n",
    )
    .unwrap();
    let retrieval = RetrievalLoop::from_config(
        &config,
        Arc::new(StaticSearch::new(scenario_results())),
        Arc::new(StaticFetcher::new().with_page(page)),
        Arc::new(OrderReranker::Reverse),
        Arc::new(CannedLlm::new(
            r#"{"facets":[{"name":"quantum entanglement","required":true}]}"#,
        )),
        Some(Arc::new(tracker)),
    )
    .unwrap();
    let planner = ScriptedPlanner::new([
        PlannedAction::search("nvidia"),
        PlannedAction::fetch("https://www.anandtech.com/show/gpu"),
        PlannedAction::rerank(Some(4)),
        PlannedAction::Stop,
    ]);

    let outcome = retrieval
        .run(QUESTION, scenario_budget(), &planner)
        .await
        .unwrap();

    assert_eq!(outcome.stop, LoopStop::PlannerStop);
    assert_eq!(outcome.state.passages.len(), 4);
    assert!(outcome.state.passages[0].id.starts_with("fetch_"));
    assert_eq!(outcome.state.metrics.reranks, 1);

    let records = log.drain();
    let purposes: Vec<&str> = records.iter().map(|record| record.purpose.as_str()).collect();
    assert_eq!(purposes, vec!["fetch", "rerank"]);
    assert!(records[0].model.is_none());
    assert_eq!(records[1].model.as_deref(), Some("rerank-v3"));
}

#[tokio::test]
async fn exhausted_budgets_do_not_stop_the_loop() {
    let retrieval = RetrievalLoop::new(
        ActionExecutor::new(
            Arc::new(StaticSearch::new(scenario_results())),
            Arc::new(StaticFetcher::new()),
            Arc::new(OrderReranker::Identity),
        ),
        Arc::new(CannedLlm::failing()),
    )
    .with_freshness_boost(false);
    let planner = ScriptedPlanner::new([
        PlannedAction::search("nvidia"),
        PlannedAction::rerank(None),
    ]);
    let budget = Budget {
        searches: 0,
        fetches: 0,
        time_ms: 10_000,
    };

    let outcome = retrieval.run(QUESTION, budget, &planner).await.unwrap();

    assert_eq!(outcome.stop, LoopStop::PlannerExhausted);
    assert_eq!(outcome.iterations, 3);
    assert!(outcome.state.passages.is_empty());
    assert_eq!(outcome.state.metrics.reranks, 1);
    assert_eq!(outcome.state.facets[0].name, "Core answer");
}

struct BrokenPlanner;

#[async_trait]
impl Planner for BrokenPlanner {
    async fn next_action(&self, _state: &AgentState) -> anyhow::Result<Option<PlannedAction>> {
        Err(anyhow::anyhow!("planner model refused"))
    }
}

#[tokio::test]
async fn planner_errors_surface_to_caller() {
    let retrieval = RetrievalLoop::new(
        ActionExecutor::new(
            Arc::new(StaticSearch::default()),
            Arc::new(StaticFetcher::new()),
            Arc::new(OrderReranker::Identity),
        ),
        Arc::new(CannedLlm::failing()),
    );

    let err = retrieval
        .run(QUESTION, scenario_budget(), &BrokenPlanner)
        .await
        .unwrap_err();
    assert!(matches!(err, DeepSearchError::Planner(_)));
}

#[test]
fn time_condition_stops_regardless_of_progress() {
    let started = chrono::Utc::now().timestamp_millis() - 9_000;
    let state = AgentState::started_at(QUESTION, scenario_budget(), started);
    assert!(state.facets.is_empty() && state.passages.is_empty());
    assert!(should_stop_loop(&state, false, 0.0));
}
