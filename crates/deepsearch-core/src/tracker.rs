//! Optional instrumentation for provider calls.
//!
//! The executor reports FETCH and RERANK calls through [`ApiCallTracker`];
//! SEARCH and facet extraction are never tracked.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One tracked provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub purpose: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub response_time_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
    pub timestamp_ms: u64,
}

impl CallRecord {
    pub fn new(purpose: impl Into<String>, response_time_ms: u64, success: bool) -> Self {
        Self {
            purpose: purpose.into(),
            model: None,
            provider: None,
            response_time_ms,
            success,
            error: None,
            metadata: serde_json::Value::Null,
            timestamp_ms: current_timestamp(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }
}

pub trait ApiCallTracker: Send + Sync {
    fn track_call(&self, record: CallRecord);
}

pub type DynCallTracker = Arc<dyn ApiCallTracker>;

/// Tracker that forwards records over an unbounded channel.
#[derive(Clone)]
pub struct ChannelCallTracker {
    sender: mpsc::UnboundedSender<CallRecord>,
}

impl ChannelCallTracker {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CallRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ApiCallTracker for ChannelCallTracker {
    fn track_call(&self, record: CallRecord) {
        if let Err(e) = self.sender.send(record) {
            tracing::warn!(error = %e, "Failed to forward call record");
        }
    }
}

/// Buffers records received from a [`ChannelCallTracker`].
pub struct CallLog {
    receiver: mpsc::UnboundedReceiver<CallRecord>,
    records: Vec<CallRecord>,
}

impl CallLog {
    pub fn new(receiver: mpsc::UnboundedReceiver<CallRecord>) -> Self {
        Self {
            receiver,
            records: Vec::new(),
        }
    }

    /// Pull every record currently queued without waiting.
    pub fn drain(&mut self) -> &[CallRecord] {
        while let Ok(record) = self.receiver.try_recv() {
            tracing::trace!(purpose = %record.purpose, "Collected call record");
            self.records.push(record);
        }
        &self.records
    }

    pub fn records(&self) -> &[CallRecord] {
        &self.records
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.records)
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
