//! Published-date extraction for fetched pages.
//!
//! Sources are tried in order of reliability: structured data, meta tags,
//! the URL path, then date-like phrases near the top of the body text.

use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::providers::FetchResponse;

/// Body prefix scanned for date phrases.
const BODY_SCAN_CHARS: usize = 2_000;

pub trait DateExtractor: Send + Sync {
    fn extract_published_date(&self, page: &FetchResponse) -> Option<NaiveDate>;
}

static JSON_LD_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""date(?:Published|Created)"\s*:\s*"([^"]+)""#).expect("invalid json-ld regex")
});

static META_NAME_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<meta[^>]+(?:property|name|itemprop)\s*=\s*["'](?:article:published_time|og:published_time|datepublished|pubdate|publishdate|dc\.date|date)["'][^>]*content\s*=\s*["']([^"']+)["']"#,
    )
    .expect("invalid meta regex")
});

static META_CONTENT_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<meta[^>]+content\s*=\s*["']([^"']+)["'][^>]*(?:property|name|itemprop)\s*=\s*["'](?:article:published_time|og:published_time|datepublished|pubdate|publishdate|dc\.date|date)["']"#,
    )
    .expect("invalid meta regex")
});

static URL_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/((?:19|20)\d{2})[/-](\d{1,2})[/-](\d{1,2})(?:[/-]|$)").expect("invalid url regex")
});

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b((?:19|20)\d{2})-(\d{2})-(\d{2})\b").expect("invalid iso regex"));

static LONG_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|jun(?:e)?|jul(?:y)?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+(\d{1,2}),?\s+((?:19|20)\d{2})\b",
    )
    .expect("invalid long date regex")
});

/// Regex-based extractor over HTML, URL and text.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicDateExtractor;

impl DateExtractor for HeuristicDateExtractor {
    fn extract_published_date(&self, page: &FetchResponse) -> Option<NaiveDate> {
        let html = page.html.as_deref().unwrap_or_default();
        let body: String = page
            .text
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(BODY_SCAN_CHARS)
            .collect();

        [&*JSON_LD_DATE, &*META_NAME_FIRST, &*META_CONTENT_FIRST]
            .iter()
            .find_map(|pattern| {
                pattern
                    .captures(html)
                    .and_then(|caps| parse_date_value(&caps[1]))
            })
            .or_else(|| ymd_from(&URL_DATE, &page.url))
            .or_else(|| ymd_from(&ISO_DATE, &body))
            .or_else(|| long_date_from(&body))
    }
}

/// Accepts RFC 3339 timestamps or anything starting with `YYYY-MM-DD`.
pub fn parse_date_value(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.date_naive());
    }
    value
        .get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

fn ymd_from(pattern: &Regex, haystack: &str) -> Option<NaiveDate> {
    pattern.captures_iter(haystack).find_map(|caps| {
        NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        )
    })
}

fn long_date_from(haystack: &str) -> Option<NaiveDate> {
    LONG_DATE.captures_iter(haystack).find_map(|caps| {
        let month = month_number(&caps[1])?;
        NaiveDate::from_ymd_opt(caps[3].parse().ok()?, month, caps[2].parse().ok()?)
    })
}

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}
