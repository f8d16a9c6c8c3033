use std::sync::Arc;
use thiserror::Error;

/// Failures of the storage layer.
///
/// Cloneable so a single backing read can hand the same outcome to every waiter.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("decode error on line {line}: {source}")]
    Decode {
        line: usize,
        source: Arc<serde_json::Error>,
    },

    #[error("line {line} exceeds the {limit} byte limit")]
    LineTooLong { line: usize, limit: usize },

    #[error("cloud storage returned {status} for {object}")]
    CloudStatus {
        status: reqwest::StatusCode,
        object: String,
    },

    #[error("cloud storage request failed: {0}")]
    Http(Arc<reqwest::Error>),

    #[error("invalid storage URL: {0}")]
    Url(#[from] url::ParseError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Http(Arc::new(e))
    }
}
