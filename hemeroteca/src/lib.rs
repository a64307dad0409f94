//! Hemeroteca - fuzzy, frequency-aware word search over OCR'd historical gazettes
//!
//! Query words are encoded as pyramidal character histograms, matched against
//! each shard's vocabulary with an approximate nearest-neighbor index, and the
//! matched vocabulary is counted per document, page and region in SQLite.
//! Several words combine with AND (same region) or OR (any document).
//! A direct edit-distance scan covers corpora without a built index.

pub mod ann;
pub mod catalog;
pub mod combine;
pub mod config;
pub mod corpus;
pub mod database;
pub mod distance;
pub mod encoding;
mod error;
pub mod fuzzy;
pub mod indexer;
pub mod location;
pub mod progress;
pub mod resolver;
pub mod result;
pub mod service;
pub mod shard;
pub mod timeline;

pub use combine::{CombineMode, CombinedResult, QueryCombiner};
pub use config::Config;
pub use database::RepetitionStore;
pub use error::{SearchError, SearchResult};
pub use resolver::MatchResolver;
pub use result::QueryResult;
pub use service::SearchService;
