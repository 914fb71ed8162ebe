use std::path::PathBuf;

use thiserror::Error;

/// Core error type for DeepSearch.
#[derive(Debug, Error)]
pub enum DeepSearchError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{operation} provider failed: {reason}")]
    Provider {
        operation: &'static str,
        reason: String,
    },
    #[error("planner error: {0}")]
    Planner(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeepSearchError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn provider(operation: &'static str, err: &anyhow::Error) -> Self {
        Self::Provider {
            operation,
            reason: format!("{err:#}"),
        }
    }
}
