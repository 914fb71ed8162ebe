//! Lexical heuristic tables used by facet scoring and result filtering.
//!
//! Tables are plain data so deployments can extend them from configuration
//! without touching control flow. Load once, then share behind an `Arc`.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few",
    "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "him", "his", "how", "if", "in", "into", "is", "it", "its", "itself", "just", "like",
    "more", "most", "much", "must", "my", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "out", "over", "own", "same", "she", "should", "so",
    "some", "such", "than", "that", "the", "their", "theirs", "them", "then", "there", "these",
    "they", "this", "those", "through", "to", "too", "under", "until", "up", "very", "was",
    "we", "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will",
    "with", "would", "you", "your", "yours",
];

/// The longest applicable suffix is stripped.
const STEM_SUFFIXES: &[&str] = &["ing", "ed", "er", "est", "ly", "s", "es"];

const SYNONYMS: &[(&str, &[&str])] = &[
    ("chip", &["processor", "semiconductor"]),
    ("chips", &["processors", "semiconductors"]),
    ("gpu", &["graphics processor", "accelerator"]),
    ("market", &["industry", "sector"]),
    ("share", &["portion", "stake"]),
    ("revenue", &["sales", "income"]),
    ("profit", &["earnings", "margin"]),
    ("price", &["cost", "pricing"]),
    ("growth", &["increase", "expansion"]),
    ("stock", &["shares", "equity"]),
    ("launch", &["release", "unveil"]),
    ("regulation", &["rules", "policy"]),
    ("ceo", &["chief executive"]),
    ("ai", &["artificial intelligence", "machine learning"]),
    ("battery", &["batteries", "cells"]),
    ("forecast", &["outlook", "projection"]),
];

const COMPANY_VARIANTS: &[(&str, &[&str])] = &[
    ("nvidia", &["nvidia corp", "nvda"]),
    ("apple", &["apple inc", "aapl"]),
    ("microsoft", &["msft", "microsoft corp"]),
    ("google", &["alphabet", "googl"]),
    ("alphabet", &["google", "googl"]),
    ("amazon", &["amzn", "aws"]),
    ("meta", &["meta platforms", "facebook"]),
    ("tesla", &["tsla", "tesla inc"]),
    ("amd", &["advanced micro devices"]),
    ("intel", &["intc", "intel corp"]),
    ("tsmc", &["taiwan semiconductor"]),
    ("openai", &["chatgpt"]),
];

/// URL patterns for low-value listing pages, documents and social networks.
const URL_DENYLIST: &[&str] = &[
    r"/tags?/",
    r"/categor(y|ies)/",
    r"/authors?/",
    r"/page/\d+",
    r"[?&]page=\d+",
    r"\.(pdf|docx?|pptx?|xlsx?)([?#]|$)",
    r"(^|[/.])(facebook|twitter|x|instagram|tiktok|pinterest|linkedin)\.com([/:?#]|$)",
];

/// Additions layered on top of the built-in tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeuristicOverrides {
    #[serde(default)]
    pub stop_words: Vec<String>,
    #[serde(default)]
    pub synonyms: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub company_variants: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub url_denylist: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HeuristicTables {
    pub stop_words: HashSet<String>,
    pub stem_suffixes: Vec<String>,
    pub synonyms: HashMap<String, Vec<String>>,
    pub company_variants: HashMap<String, Vec<String>>,
    pub url_denylist: Vec<String>,
}

impl Default for HeuristicTables {
    fn default() -> Self {
        Self {
            stop_words: STOP_WORDS.iter().map(|word| word.to_string()).collect(),
            stem_suffixes: STEM_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            synonyms: table(SYNONYMS),
            company_variants: table(COMPANY_VARIANTS),
            url_denylist: URL_DENYLIST.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl HeuristicTables {
    /// Built-in tables extended with the configured overrides.
    pub fn with_overrides(overrides: &HeuristicOverrides) -> Self {
        let mut tables = Self::default();
        tables
            .stop_words
            .extend(overrides.stop_words.iter().map(|word| word.to_lowercase()));
        merge(&mut tables.synonyms, &overrides.synonyms);
        merge(&mut tables.company_variants, &overrides.company_variants);
        tables
            .url_denylist
            .extend(overrides.url_denylist.iter().cloned());
        tables
    }

    pub fn is_stop_word(&self, token: &str) -> bool {
        self.stop_words.contains(token)
    }

    /// Crude suffix strip using the longest suffix that leaves a stem of at
    /// least three bytes; `None` when no suffix applies.
    pub fn stem<'a>(&self, token: &'a str) -> Option<&'a str> {
        self.stem_suffixes
            .iter()
            .filter(|suffix| token.len() > suffix.len() + 2)
            .filter_map(|suffix| token.strip_suffix(suffix.as_str()))
            .min_by_key(|stem| stem.len())
    }

    /// Synonym and company-name expansions for one keyword.
    pub fn expansions(&self, keyword: &str) -> impl Iterator<Item = &String> {
        self.synonyms
            .get(keyword)
            .into_iter()
            .chain(self.company_variants.get(keyword))
            .flatten()
    }
}

fn table(entries: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(key, values)| {
            (
                key.to_string(),
                values.iter().map(|value| value.to_string()).collect(),
            )
        })
        .collect()
}

fn merge(target: &mut HashMap<String, Vec<String>>, extra: &HashMap<String, Vec<String>>) {
    for (key, values) in extra {
        let entry = target.entry(key.to_lowercase()).or_default();
        for value in values {
            let value = value.to_lowercase();
            if !entry.contains(&value) {
                entry.push(value);
            }
        }
    }
}
