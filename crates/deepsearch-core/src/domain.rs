//! Registrable-domain (eTLD+1) canonicalisation used for source grouping.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use url::{Host, Url};

/// Second-level public suffixes under which registrations happen one label deeper.
static MULTI_LABEL_SUFFIXES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "co.uk", "org.uk", "ac.uk", "gov.uk", "ltd.uk", "plc.uk", "me.uk", "co.jp", "ne.jp",
        "or.jp", "ac.jp", "go.jp", "com.au", "net.au", "org.au", "edu.au", "gov.au", "co.nz",
        "org.nz", "govt.nz", "com.br", "com.cn", "net.cn", "org.cn", "gov.cn", "com.hk",
        "com.sg", "com.tw", "co.kr", "co.in", "net.in", "org.in", "gov.in", "co.za", "com.mx",
        "com.ar", "com.tr", "co.il", "com.my", "com.ph", "com.vn", "co.id",
    ]
    .into_iter()
    .collect()
});

/// Resolve the registrable domain for `raw_url`, e.g. `news.bbc.co.uk` -> `bbc.co.uk`.
///
/// Scheme-less inputs are retried with `https://`. IP hosts are returned verbatim.
pub fn registrable_domain(raw_url: &str) -> Option<String> {
    let trimmed = raw_url.trim();
    if trimmed.is_empty() {
        return None;
    }

    let parsed = Url::parse(trimmed)
        .ok()
        .filter(|url| url.host().is_some())
        .or_else(|| Url::parse(&format!("https://{trimmed}")).ok())?;

    match parsed.host()? {
        Host::Domain(host) => registrable_from_host(host),
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}

/// Grouping key for diversity accounting; unparseable URLs group under themselves.
pub fn domain_key(raw_url: &str) -> String {
    registrable_domain(raw_url).unwrap_or_else(|| raw_url.trim().to_lowercase())
}

fn registrable_from_host(host: &str) -> Option<String> {
    let host = host.trim_end_matches('.').to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let labels: Vec<&str> = host.split('.').filter(|label| !label.is_empty()).collect();

    match labels.len() {
        0 => None,
        1 | 2 => Some(labels.join(".")),
        n => {
            let suffix = format!("{}.{}", labels[n - 2], labels[n - 1]);
            let keep = if MULTI_LABEL_SUFFIXES.contains(suffix.as_str()) {
                3
            } else {
                2
            };
            Some(labels[n - keep..].join("."))
        }
    }
}
