//! Early-termination guards and the freshness side search.

use std::collections::HashSet;
use std::fmt;

use chrono::{Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::executor::FreshnessSearch;
use crate::facets::distinct_domains;
use crate::state::{AgentState, TimeRange};

/// Past this share of the time budget the loop stops unconditionally.
pub const HARD_STOP_TIME_FRACTION: f64 = 0.85;
pub const SOFT_STOP_TIME_FRACTION: f64 = 0.80;
pub const SOFT_STOP_COVERAGE_RATIO: f64 = 0.6;
pub const MIN_STOP_DOMAINS: usize = 2;
pub const UNPRODUCTIVE_PASSAGE_LIMIT: usize = 15;
pub const FRESHNESS_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TimeBudgetExhausted,
    RequiredFacetsCovered,
    UnproductiveSearch,
    TimeWithSufficientCoverage,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::TimeBudgetExhausted => "time budget nearly exhausted",
            StopReason::RequiredFacetsCovered => "required facets covered by diverse sources",
            StopReason::UnproductiveSearch => "many passages but no facet covered",
            StopReason::TimeWithSufficientCoverage => "time running out with sufficient coverage",
        };
        f.write_str(text)
    }
}

/// First matching stop condition, in precedence order.
pub fn stop_reason(
    state: &AgentState,
    required_facets_covered: bool,
    facet_coverage_ratio: f64,
) -> Option<StopReason> {
    stop_reason_at(
        state,
        required_facets_covered,
        facet_coverage_ratio,
        state.elapsed_ms(),
    )
}

pub fn stop_reason_at(
    state: &AgentState,
    required_facets_covered: bool,
    facet_coverage_ratio: f64,
    elapsed_ms: u64,
) -> Option<StopReason> {
    let budget_ms = state.budget.time_ms as f64;
    let elapsed = elapsed_ms as f64;

    if elapsed > budget_ms * HARD_STOP_TIME_FRACTION {
        return Some(StopReason::TimeBudgetExhausted);
    }
    if required_facets_covered && distinct_domains(&state.passages) >= MIN_STOP_DOMAINS {
        return Some(StopReason::RequiredFacetsCovered);
    }
    if state.passages.len() >= UNPRODUCTIVE_PASSAGE_LIMIT
        && !state.facets.iter().any(|facet| facet.covered)
    {
        return Some(StopReason::UnproductiveSearch);
    }
    if elapsed > budget_ms * SOFT_STOP_TIME_FRACTION
        && facet_coverage_ratio >= SOFT_STOP_COVERAGE_RATIO
    {
        return Some(StopReason::TimeWithSufficientCoverage);
    }
    None
}

pub fn should_stop_loop(
    state: &AgentState,
    required_facets_covered: bool,
    facet_coverage_ratio: f64,
) -> bool {
    stop_reason(state, required_facets_covered, facet_coverage_ratio).is_some()
}

pub trait TimeSensitivityClassifier: Send + Sync {
    fn is_time_sensitive(&self, question: &str) -> bool;
}

static RECENCY_TERMS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "latest", "current", "currently", "today", "now", "recent", "recently", "breaking",
        "news", "price", "prices", "update", "updates", "announced", "upcoming", "yesterday",
        "tonight",
    ]
    .into_iter()
    .collect()
});

const RECENCY_PHRASES: &[&str] = &["this week", "this month", "this year", "right now"];

/// Flags recency vocabulary or a year within one of the current year.
#[derive(Debug, Clone, Copy)]
pub struct LexicalTimeSensitivity {
    current_year: i32,
}

impl LexicalTimeSensitivity {
    pub fn with_year(current_year: i32) -> Self {
        Self { current_year }
    }

    fn is_recent_year(&self, year: i32) -> bool {
        (self.current_year - 1..=self.current_year + 1).contains(&year)
    }
}

impl Default for LexicalTimeSensitivity {
    fn default() -> Self {
        Self::with_year(Utc::now().year())
    }
}

impl TimeSensitivityClassifier for LexicalTimeSensitivity {
    fn is_time_sensitive(&self, question: &str) -> bool {
        let lowered = question.to_lowercase();
        if RECENCY_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
            return true;
        }

        lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .any(|token| {
                RECENCY_TERMS.contains(token)
                    || (token.len() == 4 && token.parse::<i32>().is_ok_and(|year| self.is_recent_year(year)))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreshnessBoost {
    NotTimeSensitive,
    AlreadyFresh,
    NoSearchBudget,
    Boosted { added: usize },
    Failed,
}

pub async fn maybe_freshness_boost(
    state: &mut AgentState,
    classifier: &dyn TimeSensitivityClassifier,
    run_search: &dyn FreshnessSearch,
) -> FreshnessBoost {
    maybe_freshness_boost_at(state, classifier, run_search, Utc::now().date_naive()).await
}

/// Issue one week-bounded search when the question wants recent information
/// and the newest passage is undated or older than the freshness window.
pub async fn maybe_freshness_boost_at(
    state: &mut AgentState,
    classifier: &dyn TimeSensitivityClassifier,
    run_search: &dyn FreshnessSearch,
    today: NaiveDate,
) -> FreshnessBoost {
    if !classifier.is_time_sensitive(state.question()) {
        return FreshnessBoost::NotTimeSensitive;
    }

    let stale = match state.newest_published_date() {
        Some(newest) => (today - newest).num_days() > FRESHNESS_WINDOW_DAYS,
        None => true,
    };
    if !stale {
        debug!("newest passage is fresh; no boost needed");
        return FreshnessBoost::AlreadyFresh;
    }
    if state.budget.searches == 0 {
        debug!("freshness boost wanted but search budget exhausted");
        return FreshnessBoost::NoSearchBudget;
    }

    let query = format!("{} {} latest", state.question(), today.year());
    state.budget.searches -= 1;

    match run_search.run_search(state, &query, TimeRange::Week).await {
        Ok(added) => {
            info!(%query, added, remaining = state.budget.searches, "freshness boost search completed");
            FreshnessBoost::Boosted { added }
        }
        Err(err) => {
            warn!(%query, error = %err, "freshness boost search failed");
            FreshnessBoost::Failed
        }
    }
}
