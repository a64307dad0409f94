use crate::ann::IndexError;
use crate::config::ConfigError;
use crate::corpus::CorpusError;
use crate::database::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Error type for search and build operations
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
    #[error("Corpus error: {0}")]
    Corpus(#[from] CorpusError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Consistency violation: {0}")]
    Consistency(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

pub type SearchResult<T> = Result<T, SearchError>;
