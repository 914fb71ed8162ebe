//! Facet extraction and lexical facet coverage.
//!
//! A facet is a sub-question of the user's question. Extraction asks an LLM
//! for 2-5 required facets; coverage is recomputed from scratch against the
//! current passages every time so that reranks and prunes never leave stale
//! sources behind.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::heuristics::HeuristicTables;
use crate::providers::{ChatMessage, LlmClient, ModelConfig};
use crate::state::{Facet, Passage};

pub const MAX_FACETS: usize = 5;
pub const MAX_FACET_NAME_CHARS: usize = 120;
/// Minimum keyword score for a passage to count as evidence for a facet.
pub const FACET_MATCH_THRESHOLD: f64 = 0.3;
pub const REQUIRED_COVERAGE_RATIO: f64 = 0.6;
pub const FALLBACK_FACET_NAME: &str = "Core answer";

const FACET_SYSTEM_PROMPT: &str = "You decompose research questions into the sub-questions \
that must be answered before the question can be answered confidently. Return 2-5 required \
sub-questions, each a short noun phrase. Respond with minified JSON only, exactly in the form \
{\"facets\":[{\"name\":\"...\",\"required\":true}]}.";

/// Which model to ask for facets.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FacetOptions {
    #[serde(default = "FacetOptions::default_provider")]
    pub provider: String,
    #[serde(default = "FacetOptions::default_model")]
    pub model: String,
    #[serde(default = "FacetOptions::default_temperature")]
    pub temperature: f32,
    #[serde(default = "FacetOptions::default_max_tokens")]
    pub max_tokens: u32,
}

impl FacetOptions {
    fn default_provider() -> String {
        "openai".to_string()
    }

    fn default_model() -> String {
        "gpt-4o-mini".to_string()
    }

    const fn default_temperature() -> f32 {
        0.0
    }

    const fn default_max_tokens() -> u32 {
        300
    }
}

impl Default for FacetOptions {
    fn default() -> Self {
        Self {
            provider: Self::default_provider(),
            model: Self::default_model(),
            temperature: Self::default_temperature(),
            max_tokens: Self::default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FacetManager {
    tables: Arc<HeuristicTables>,
}

impl Default for FacetManager {
    fn default() -> Self {
        Self::new(Arc::new(HeuristicTables::default()))
    }
}

impl FacetManager {
    pub fn new(tables: Arc<HeuristicTables>) -> Self {
        Self { tables }
    }

    /// Ask the LLM for the question's facets. Never fails: provider errors and
    /// malformed replies yield the single fallback facet.
    #[instrument(name = "facets.extract", skip(self, llm, opts))]
    pub async fn extract_facets(
        &self,
        llm: &dyn LlmClient,
        question: &str,
        opts: &FacetOptions,
    ) -> Vec<Facet> {
        let messages = [
            ChatMessage::system(FACET_SYSTEM_PROMPT),
            ChatMessage::user(question),
        ];
        let config = ModelConfig {
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
            json_response: true,
        };

        let reply = match llm
            .complete(&opts.provider, &opts.model, &messages, &config)
            .await
        {
            Ok(response) => response.first_content().map(str::to_string),
            Err(err) => {
                warn!(error = %err, "facet extraction call failed; using fallback facet");
                None
            }
        };

        match reply.as_deref().and_then(parse_facets) {
            Some(facets) => {
                debug!(count = facets.len(), "extracted facets");
                facets
            }
            None => {
                warn!("facet reply missing or malformed; using fallback facet");
                vec![fallback_facet()]
            }
        }
    }

    /// Recompute every facet's sources against `passages`, returning new facets.
    pub fn update_facet_coverage(&self, facets: &[Facet], passages: &[Passage]) -> Vec<Facet> {
        facets
            .iter()
            .map(|facet| {
                let sources: BTreeSet<String> = passages
                    .iter()
                    .filter(|passage| self.passage_matches_facet(passage, facet))
                    .map(Passage::domain)
                    .collect();
                facet.with_sources(sources)
            })
            .collect()
    }

    pub fn passage_matches_facet(&self, passage: &Passage, facet: &Facet) -> bool {
        self.calculate_facet_match_score(passage, facet) >= FACET_MATCH_THRESHOLD
    }

    /// `0.7 * matched share + 0.3 * length-weighted matched share` over the facet keywords.
    pub fn calculate_facet_match_score(&self, passage: &Passage, facet: &Facet) -> f64 {
        let keywords = self.facet_keywords(&facet.name);
        if keywords.is_empty() {
            return 0.0;
        }

        let haystack = format!(
            "{} {}",
            passage.title.as_deref().unwrap_or_default(),
            passage.text
        )
        .to_lowercase();

        let (matched, weight) = keywords
            .iter()
            .filter(|keyword| haystack.contains(keyword.as_str()))
            .fold((0usize, 0.0f64), |(count, weight), keyword| {
                let length_weight = (keyword.chars().count() as f64 / 5.0).min(1.0);
                (count + 1, weight + length_weight)
            });

        let total = keywords.len() as f64;
        0.7 * (matched as f64 / total) + 0.3 * (weight / total)
    }

    /// Keywords for a facet name: content tokens, their stems, synonyms and
    /// company-name variants, deduplicated in first-seen order.
    pub fn facet_keywords(&self, name: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut keywords = Vec::new();
        let mut push = |keyword: &str| {
            if !keyword.is_empty() && seen.insert(keyword.to_string()) {
                keywords.push(keyword.to_string());
            }
        };

        for raw in name.split_whitespace() {
            let token = raw
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.chars().count() <= 2 || self.tables.is_stop_word(&token) {
                continue;
            }

            push(&token);
            let stem = self.tables.stem(&token);
            if let Some(stem) = stem {
                push(stem);
            }
            for base in std::iter::once(token.as_str()).chain(stem) {
                for expansion in self.tables.expansions(base) {
                    push(expansion);
                }
            }
        }

        keywords
    }
}

/// Fraction of required facets that are covered; 0 when nothing is required.
pub fn facet_coverage_ratio(facets: &[Facet]) -> f64 {
    let required: Vec<&Facet> = facets.iter().filter(|facet| facet.required).collect();
    if required.is_empty() {
        return 0.0;
    }
    let covered = required.iter().filter(|facet| facet.covered).count();
    covered as f64 / required.len() as f64
}

/// Both the ratio gate and the per-facet gate must hold.
pub fn all_required_facets_covered(facets: &[Facet]) -> bool {
    let ratio_ok = facet_coverage_ratio(facets) >= REQUIRED_COVERAGE_RATIO;
    let each_ok = facets
        .iter()
        .filter(|facet| facet.required)
        .all(|facet| facet.covered);
    ratio_ok && each_ok
}

pub fn distinct_domains(passages: &[Passage]) -> usize {
    passages
        .iter()
        .map(Passage::domain)
        .collect::<HashSet<_>>()
        .len()
}

pub fn has_domain_diversity(passages: &[Passage], min_domains: usize) -> bool {
    distinct_domains(passages) >= min_domains
}

pub fn fallback_facet() -> Facet {
    Facet::new(FALLBACK_FACET_NAME, true)
}

fn parse_facets(reply: &str) -> Option<Vec<Facet>> {
    let payload: Value = serde_json::from_str(strip_code_fence(reply)).ok()?;
    let entries = payload.get("facets")?.as_array()?;

    let facets: Vec<Facet> = entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.trim();
            if name.is_empty() {
                return None;
            }
            let required = entry
                .get("required")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            Some(Facet::new(clip(name, MAX_FACET_NAME_CHARS), required))
        })
        .take(MAX_FACETS)
        .collect();

    if facets.is_empty() { None } else { Some(facets) }
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::stub::CannedLlm;

    fn passage(url: &str, text: &str) -> Passage {
        Passage::new(format!("p-{url}"), text, url)
    }

    fn covered(name: &str, required: bool, covered: bool) -> Facet {
        let facet = Facet::new(name, required);
        if covered {
            facet.with_sources(["example.com".to_string()].into_iter().collect())
        } else {
            facet
        }
    }

    #[tokio::test]
    async fn extraction_parses_and_clips() {
        let long_name = "x".repeat(200);
        let reply = format!(
            r#"{{"facets":[{{"name":"market share"}},{{"name":"{long_name}","required":false}},{{"name":"a"}},{{"name":"b"}},{{"name":"c"}},{{"name":"d"}}]}}"#
        );
        let manager = FacetManager::default();
        let facets = manager
            .extract_facets(&CannedLlm::new(reply), "q", &FacetOptions::default())
            .await;

        assert_eq!(facets.len(), MAX_FACETS);
        assert_eq!(facets[0].name, "market share");
        assert!(facets[0].required);
        assert_eq!(facets[1].name.chars().count(), MAX_FACET_NAME_CHARS);
        assert!(!facets[1].required);
        assert!(facets.iter().all(|facet| !facet.covered));
    }

    #[tokio::test]
    async fn extraction_falls_back_on_bad_output() {
        let manager = FacetManager::default();
        let opts = FacetOptions::default();

        for llm in [
            CannedLlm::new("not json at all"),
            CannedLlm::new(r#"{"facets":"nope"}"#),
            CannedLlm::new(r#"{"facets":[]}"#),
            CannedLlm::failing(),
        ] {
            let facets = manager.extract_facets(&llm, "q", &opts).await;
            assert_eq!(facets, vec![fallback_facet()]);
        }
    }

    #[tokio::test]
    async fn extraction_unwraps_code_fences() {
        let manager = FacetManager::default();
        let reply = "```json\n{\"facets\":[{\"name\":\"pricing\",\"required\":true}]}\n```";
        let facets = manager
            .extract_facets(&CannedLlm::new(reply), "q", &FacetOptions::default())
            .await;
        assert_eq!(facets[0].name, "pricing");
    }

    #[test]
    fn keywords_drop_stop_words_and_expand() {
        let manager = FacetManager::default();
        let keywords = manager.facet_keywords("What is the NVIDIA chips revenue?");

        assert!(!keywords.iter().any(|k| k == "what" || k == "the" || k == "is"));
        for expected in ["nvidia", "nvda", "chips", "chip", "processor", "revenue", "sales"] {
            assert!(keywords.iter().any(|k| k == expected), "missing {expected}");
        }
        let unique: HashSet<&String> = keywords.iter().collect();
        assert_eq!(unique.len(), keywords.len());
    }

    #[test]
    fn market_share_passage_matches() {
        let manager = FacetManager::default();
        let facet = Facet::new("market share", true);
        let hit = passage("https://reuters.com/a", "NVIDIA's market share grew to 80%");
        let miss = passage("https://reuters.com/b", "The weather in Paris is mild");

        assert!(manager.calculate_facet_match_score(&hit, &facet) >= FACET_MATCH_THRESHOLD);
        assert!(manager.passage_matches_facet(&hit, &facet));
        assert!(!manager.passage_matches_facet(&miss, &facet));
    }

    #[test]
    fn plural_facet_matches_singular_passage() {
        let manager = FacetManager::default();
        let facet = Facet::new("price matches", true);
        let p = passage("https://retail.com/a", "Retailers cut the price match guarantee");

        assert!(manager.facet_keywords(&facet.name).iter().any(|k| k == "match"));
        assert!(manager.passage_matches_facet(&p, &facet));
    }

    #[test]
    fn empty_keyword_set_scores_zero() {
        let manager = FacetManager::default();
        let facet = Facet::new("of the", true);
        let p = passage("https://a.com", "of the");
        assert_eq!(manager.calculate_facet_match_score(&p, &facet), 0.0);
    }

    #[test]
    fn coverage_recompute_is_idempotent() {
        let manager = FacetManager::default();
        let facets = vec![Facet::new("market share", true), Facet::new("pricing", false)];
        let passages = vec![
            passage("https://reuters.com/a", "market share rose"),
            passage("https://www.ft.com/b", "market share fell"),
        ];

        let once = manager.update_facet_coverage(&facets, &passages);
        let twice = manager.update_facet_coverage(&once, &passages);
        assert_eq!(once, twice);
        assert!(once[0].covered && once[0].multiple_sources);
        assert_eq!(once[0].sources.len(), 2);
        assert!(!once[1].covered);

        let pruned = manager.update_facet_coverage(&once, &[]);
        assert!(!pruned[0].covered && pruned[0].sources.is_empty());
    }

    #[test]
    fn required_gate_needs_every_required_facet() {
        let facets = vec![
            covered("a", true, true),
            covered("b", true, true),
            covered("c", true, true),
            covered("d", true, false),
            covered("e", false, false),
        ];
        assert!(facet_coverage_ratio(&facets) >= REQUIRED_COVERAGE_RATIO);
        assert!(!all_required_facets_covered(&facets));

        let half = vec![
            covered("a", true, true),
            covered("b", true, true),
            covered("c", true, false),
            covered("d", true, false),
        ];
        assert_eq!(facet_coverage_ratio(&half), 0.5);
        assert!(!all_required_facets_covered(&half));

        let all = vec![covered("a", true, true), covered("b", false, false)];
        assert!(all_required_facets_covered(&all));
        assert!(!all_required_facets_covered(&[]));
    }

    #[test]
    fn domain_diversity_counts_registrable_domains() {
        let passages = vec![
            passage("https://a.reuters.com/1", "x"),
            passage("https://b.reuters.com/2", "y"),
            passage("https://ft.com/3", "z"),
        ];
        assert_eq!(distinct_domains(&passages), 2);
        assert!(has_domain_diversity(&passages, 2));
        assert!(!has_domain_diversity(&passages, 3));
    }
}
