//! Mutable agent state threaded through every step of the retrieval loop.

use std::collections::{BTreeSet, VecDeque};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of queries retained in the search history.
pub const SEARCH_HISTORY_LIMIT: usize = 10;

/// Remaining allowance for one question's resolution loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub searches: u32,
    pub fetches: u32,
    /// Wall-clock ceiling, compared against time elapsed since the loop started.
    pub time_ms: u64,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            searches: 4,
            fetches: 6,
            time_ms: 45_000,
        }
    }
}

/// Observability counters. Only ever incremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopMetrics {
    pub searches: u64,
    pub fetches: u64,
    pub reranks: u64,
}

/// A unit of retrieved evidence with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_domain: Option<String>,
}

impl Passage {
    pub fn new(id: impl Into<String>, text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            url: url.into(),
            title: None,
            published_date: None,
            source_domain: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_published_date(mut self, date: NaiveDate) -> Self {
        self.published_date = Some(date);
        self
    }

    /// Registrable domain of this passage, preferring the recorded `source_domain`.
    pub fn domain(&self) -> String {
        self.source_domain
            .clone()
            .unwrap_or_else(|| crate::domain::domain_key(&self.url))
    }
}

/// A sub-question that needs evidence before the main question counts as answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    pub name: String,
    pub required: bool,
    pub sources: BTreeSet<String>,
    pub covered: bool,
    pub multiple_sources: bool,
}

impl Facet {
    pub fn new(name: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            required,
            sources: BTreeSet::new(),
            covered: false,
            multiple_sources: false,
        }
    }

    /// Copy of this facet with the source-derived fields recomputed from `sources`.
    pub fn with_sources(&self, sources: BTreeSet<String>) -> Self {
        Self {
            name: self.name.clone(),
            required: self.required,
            covered: !sources.is_empty(),
            multiple_sources: sources.len() >= 2,
            sources,
        }
    }
}

/// Bounded FIFO of issued search queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHistory {
    queries: VecDeque<String>,
}

impl SearchHistory {
    pub fn push(&mut self, query: impl Into<String>) {
        self.queries.push_back(query.into());
        while self.queries.len() > SEARCH_HISTORY_LIMIT {
            self.queries.pop_front();
        }
    }

    pub fn contains(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        self.queries
            .iter()
            .any(|existing| existing.trim().to_lowercase() == needle)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.queries.iter()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Recency window for a search request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Day,
    Week,
    Month,
    Year,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Day => "day",
            TimeRange::Week => "week",
            TimeRange::Month => "month",
            TimeRange::Year => "year",
        }
    }
}

/// One step requested by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlannedAction {
    Search {
        #[serde(default)]
        query: Option<String>,
        #[serde(default)]
        k: Option<usize>,
        #[serde(default, alias = "timeRange")]
        time_range: Option<TimeRange>,
    },
    Fetch {
        #[serde(default)]
        url: Option<String>,
    },
    Rerank {
        #[serde(default)]
        top_n: Option<usize>,
    },
    Stop,
    #[serde(other)]
    Unknown,
}

impl PlannedAction {
    pub fn search(query: impl Into<String>) -> Self {
        PlannedAction::Search {
            query: Some(query.into()),
            k: None,
            time_range: None,
        }
    }

    pub fn fetch(url: impl Into<String>) -> Self {
        PlannedAction::Fetch {
            url: Some(url.into()),
        }
    }

    pub fn rerank(top_n: Option<usize>) -> Self {
        PlannedAction::Rerank { top_n }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlannedAction::Search { .. } => "SEARCH",
            PlannedAction::Fetch { .. } => "FETCH",
            PlannedAction::Rerank { .. } => "RERANK",
            PlannedAction::Stop => "STOP",
            PlannedAction::Unknown => "UNKNOWN",
        }
    }

    /// STOP and unrecognised actions both end the loop without touching state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlannedAction::Stop | PlannedAction::Unknown)
    }
}

/// The mutable record for one question's resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    question: String,
    start_ms: i64,
    pub budget: Budget,
    pub passages: Vec<Passage>,
    pub facets: Vec<Facet>,
    pub search_history: SearchHistory,
    pub metrics: LoopMetrics,
}

impl AgentState {
    pub fn new(question: impl Into<String>, budget: Budget) -> Self {
        Self::started_at(question, budget, Utc::now().timestamp_millis())
    }

    /// Construct with an explicit start timestamp (Unix milliseconds).
    pub fn started_at(question: impl Into<String>, budget: Budget, start_ms: i64) -> Self {
        Self {
            question: question.into(),
            start_ms,
            budget,
            passages: Vec::new(),
            facets: Vec::new(),
            search_history: SearchHistory::default(),
            metrics: LoopMetrics::default(),
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms_at(Utc::now().timestamp_millis())
    }

    pub fn elapsed_ms_at(&self, now_ms: i64) -> u64 {
        u64::try_from(now_ms - self.start_ms).unwrap_or(0)
    }

    /// Swap in a new passage sequence, returning the previous snapshot.
    pub fn replace_passages(&mut self, passages: Vec<Passage>) -> Vec<Passage> {
        std::mem::replace(&mut self.passages, passages)
    }

    /// Swap in a new facet sequence, returning the previous snapshot.
    pub fn replace_facets(&mut self, facets: Vec<Facet>) -> Vec<Facet> {
        std::mem::replace(&mut self.facets, facets)
    }

    pub fn newest_published_date(&self) -> Option<NaiveDate> {
        self.passages
            .iter()
            .filter_map(|passage| passage.published_date)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_history_evicts_oldest() {
        let mut history = SearchHistory::default();
        assert!(history.is_empty());
        for idx in 0..12 {
            history.push(format!("query {idx}"));
        }
        assert_eq!(history.len(), SEARCH_HISTORY_LIMIT);
        assert_eq!(history.iter().next().map(String::as_str), Some("query 2"));
        assert!(history.contains("QUERY 11"));
        assert!(!history.contains("query 0"));
    }

    #[test]
    fn facet_flags_follow_sources() {
        let facet = Facet::new("market share", true);
        let one = facet.with_sources(["reuters.com".to_string()].into_iter().collect());
        assert!(one.covered);
        assert!(!one.multiple_sources);

        let two = facet.with_sources(
            ["reuters.com".to_string(), "ft.com".to_string()]
                .into_iter()
                .collect(),
        );
        assert!(two.covered && two.multiple_sources);
        assert!(!facet.with_sources(BTreeSet::new()).covered);
    }

    #[test]
    fn planned_action_parses_tagged_json() {
        let action: PlannedAction = serde_json::from_str(
            r#"{"type":"SEARCH","query":"nvidia share","k":5,"timeRange":"week"}"#,
        )
        .unwrap();
        assert_eq!(
            action,
            PlannedAction::Search {
                query: Some("nvidia share".into()),
                k: Some(5),
                time_range: Some(TimeRange::Week),
            }
        );

        let unknown: PlannedAction = serde_json::from_str(r#"{"type":"DANCE"}"#).unwrap();
        assert_eq!(unknown, PlannedAction::Unknown);
        assert!(unknown.is_terminal());
    }

    #[test]
    fn newest_published_date_ignores_undated_passages() {
        let mut state = AgentState::new("q", Budget::default());
        assert_eq!(state.newest_published_date(), None);

        let date = |d| NaiveDate::from_ymd_opt(2026, 9, d).unwrap();
        state.passages = vec![
            Passage::new("a", "t", "https://a.com").with_published_date(date(3)),
            Passage::new("b", "t", "https://b.com").with_title("Undated"),
            Passage::new("c", "t", "https://c.com").with_published_date(date(21)),
        ];
        assert_eq!(state.newest_published_date(), Some(date(21)));
        assert_eq!(state.passages[1].title.as_deref(), Some("Undated"));
        assert_eq!(TimeRange::Week.as_str(), "week");
    }

    #[test]
    fn elapsed_never_negative() {
        let state = AgentState::started_at("q", Budget::default(), 10_000);
        assert_eq!(state.elapsed_ms_at(9_000), 0);
        assert_eq!(state.elapsed_ms_at(12_500), 2_500);
    }
}
