//! Stateless filtering and per-batch diversity capping of raw search results.

use std::collections::HashMap;

use regex::Regex;

use crate::domain::domain_key;
use crate::error::DeepSearchError;
use crate::heuristics::HeuristicTables;
use crate::providers::RawResult;
use crate::state::Passage;

/// Survivors kept after denylist filtering.
pub const MAX_FILTERED_RESULTS: usize = 25;
/// Results accepted per registrable domain within one batch.
pub const MAX_RESULTS_PER_DOMAIN: usize = 3;
/// Results accepted per batch.
pub const MAX_DIVERSE_RESULTS: usize = 20;

#[derive(Debug, Clone)]
pub struct SearchResultProcessor {
    denylist: Vec<Regex>,
}

impl SearchResultProcessor {
    pub fn new(tables: &HeuristicTables) -> Result<Self, DeepSearchError> {
        let denylist = tables
            .url_denylist
            .iter()
            .map(|pattern| {
                Regex::new(&format!("(?i){pattern}")).map_err(|err| {
                    DeepSearchError::InvalidConfiguration(format!(
                        "invalid url denylist pattern `{pattern}`: {err}"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { denylist })
    }

    pub fn is_denied(&self, url: &str) -> bool {
        self.denylist.iter().any(|pattern| pattern.is_match(url))
    }

    /// Drop denylisted URLs and keep the first survivors in provider order.
    pub fn filter_and_score(&self, results: Vec<RawResult>) -> Vec<RawResult> {
        results
            .into_iter()
            .filter(|result| !self.is_denied(&result.url))
            .take(MAX_FILTERED_RESULTS)
            .collect()
    }

    /// Greedy per-batch domain cap. Counts start at zero for every batch, so
    /// `_existing` does not influence acceptance.
    pub fn retain_diverse(&self, filtered: Vec<RawResult>, _existing: &[Passage]) -> Vec<RawResult> {
        let mut per_domain: HashMap<String, usize> = HashMap::new();
        let mut accepted = Vec::new();

        for result in filtered {
            if accepted.len() >= MAX_DIVERSE_RESULTS {
                break;
            }
            let count = per_domain.entry(domain_key(&result.url)).or_insert(0);
            if *count < MAX_RESULTS_PER_DOMAIN {
                *count += 1;
                accepted.push(result);
            }
        }

        accepted
    }
}

impl Default for SearchResultProcessor {
    fn default() -> Self {
        Self::new(&HeuristicTables::default()).expect("built-in url denylist must compile")
    }
}
