use std::fmt::Write as _;
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub step: usize,
    pub action: String,
    pub message: String,
    pub timestamp_ms: u128,
}

impl TraceEvent {
    pub fn new(step: usize, action: impl Into<String>, message: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self {
            step,
            action: action.into(),
            message: message.into(),
            timestamp_ms,
        }
    }
}

/// Per-loop ledger of what each step did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, step: usize, action: impl Into<String>, message: impl Into<String>) {
        self.events.push(TraceEvent::new(step, action, message));
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.events)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub lines: Vec<String>,
}

impl TraceSummary {
    pub fn from_events(events: &[TraceEvent]) -> Self {
        let lines = events
            .iter()
            .map(|event| format!("{}. {} → {}", event.step, event.action, event.message))
            .collect();
        Self { lines }
    }

    pub fn render_markdown(&self) -> String {
        if self.lines.is_empty() {
            return "No trace events recorded.".to_string();
        }
        let mut output = String::from("### Retrieval Trace\n");
        for line in &self.lines {
            let _ = writeln!(output, "{line}");
        }
        output
    }
}

pub fn persist_trace<P: AsRef<Path>>(
    dir: P,
    run_id: &str,
    events: &[TraceEvent],
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    let path = dir.join(format!("{run_id}.json"));
    let payload = serde_json::to_vec_pretty(events)?;
    let mut file = File::create(&path)
        .with_context(|| format!("failed to create trace file {}", path.display()))?;
    file.write_all(&payload)
        .with_context(|| format!("failed to write trace file {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_renders_steps() {
        let mut collector = TraceCollector::new();
        collector.record(1, "SEARCH", "search added 5 passage(s)");
        collector.record(2, "RERANK", "rerank kept 4, dropped 1");

        let markdown = collector.summary().render_markdown();
        assert!(markdown.contains("1. SEARCH"));
        assert!(markdown.contains("2. RERANK"));
        assert_eq!(
            TraceSummary::default().render_markdown(),
            "No trace events recorded."
        );
    }

    #[test]
    fn persisted_trace_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = TraceCollector::new();
        collector.record(1, "FETCH", "fetch added 2 chunk(s)");

        let path = persist_trace(dir.path().join("traces"), "run-1", collector.events()).unwrap();
        let loaded: Vec<TraceEvent> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].action, "FETCH");
    }
}
