//! Runtime configuration, read from TOML

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    /// One subfolder per shard.
    pub corpus_root: PathBuf,
    /// Where `<shard>.ann`, `<shard>.vocab.json` and `<shard>.years.json` live.
    pub artifact_dir: PathBuf,
    pub encoding_levels: usize,
    /// Neighbors requested from each shard index.
    pub neighbors: usize,
    /// Maximum angular distance for a vocabulary word to count as a match.
    pub threshold: f32,
    pub n_trees: usize,
    pub leaf_size: usize,
    pub seed: u64,
    pub pool_size: u32,
    pub query_timeout_ms: u64,
    pub reference_base_url: String,
    pub create_unique_index: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("hemeroteca.db"),
            corpus_root: PathBuf::from("corpus"),
            artifact_dir: PathBuf::from("indexes"),
            encoding_levels: crate::encoding::DEFAULT_LEVELS,
            neighbors: 10,
            threshold: 0.4,
            n_trees: 100,
            leaf_size: 32,
            seed: 42,
            pool_size: 8,
            query_timeout_ms: 30_000,
            reference_base_url: "https://boe.es".to_string(),
            create_unique_index: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.encoding_levels == 0 {
            return invalid("encoding_levels must be at least 1");
        }
        if self.neighbors == 0 {
            return invalid("neighbors must be at least 1");
        }
        if self.threshold.is_nan() || self.threshold < 0.0 {
            return invalid("threshold must be a non-negative number");
        }
        if self.n_trees == 0 {
            return invalid("n_trees must be at least 1");
        }
        if self.leaf_size == 0 {
            return invalid("leaf_size must be at least 1");
        }
        if self.pool_size == 0 {
            return invalid("pool_size must be at least 1");
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            corpus_root = "/data/boe"
            threshold = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(config.corpus_root, PathBuf::from("/data/boe"));
        assert_eq!(config.threshold, 0.25);
        assert_eq!(config.neighbors, 10);
        assert_eq!(config.query_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_invalid_values() {
        for text in [
            "encoding_levels = 0",
            "neighbors = 0",
            "threshold = -0.1",
            "threshold = nan",
            "n_trees = 0",
        ] {
            assert!(
                matches!(Config::from_toml_str(text), Err(ConfigError::Invalid(_))),
                "{text} accepted"
            );
        }
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        assert!(matches!(
            Config::from_toml_str("neighbors = \"ten\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
