//! Shards: one neighbor index plus its ordered vocabulary per corpus subfolder
//!
//! On disk a shard is three files in the artifact directory:
//! - `<name>.ann`: the index
//! - `<name>.vocab.json`: the vocabulary, index position → word
//! - `<name>.years.json`: documents per publication year
//!
//! The `.ann` file is written last, so only complete shards are discovered.

use crate::ann::{ForestBuilder, IndexResult, NeighborIndex, StoredIndex};
use crate::encoding::{encode, feature_len, FeatureVector};
use crate::error::{SearchError, SearchResult};
use crate::timeline::DocsPerYear;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

const INDEX_SUFFIX: &str = ".ann";
const VOCABULARY_SUFFIX: &str = ".vocab.json";
const YEARS_SUFFIX: &str = ".years.json";

/// Vocabulary and index under construction for one shard.
///
/// Each distinct word gets one position, shared by the vocabulary list and the
/// index, in first-seen order.
pub struct VocabularyBuilder {
    levels: usize,
    words: Vec<String>,
    positions: HashMap<String, usize>,
    index: ForestBuilder,
}

impl VocabularyBuilder {
    pub fn new(levels: usize, leaf_size: usize) -> Self {
        Self {
            levels,
            words: Vec::new(),
            positions: HashMap::new(),
            index: ForestBuilder::new(feature_len(levels), leaf_size),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn position(&self, word: &str) -> Option<usize> {
        self.positions.get(word).copied()
    }

    /// Position of `word`, adding it with `vector` when first seen.
    pub fn add_if_absent(&mut self, word: &str, vector: &FeatureVector) -> IndexResult<usize> {
        if let Some(position) = self.position(word) {
            return Ok(position);
        }
        let position = self.index.add_item(&vector.to_f32())?;
        debug_assert_eq!(position, self.words.len());
        self.words.push(word.to_string());
        self.positions.insert(word.to_string(), position);
        Ok(position)
    }

    /// Like [`add_if_absent`](Self::add_if_absent), encoding only words not seen before.
    pub fn add_word(&mut self, word: &str) -> IndexResult<usize> {
        if let Some(position) = self.position(word) {
            return Ok(position);
        }
        let vector = encode(word, self.levels);
        self.add_if_absent(word, &vector)
    }

    /// Freeze into the vocabulary list and its index. Vocabularies that fit in one
    /// leaf get an exact index instead of a forest.
    pub fn finish(self, n_trees: usize, seed: u64) -> (Vec<String>, StoredIndex) {
        let index = if self.index.len() <= self.index.leaf_size() {
            StoredIndex::Flat(self.index.into_flat())
        } else {
            StoredIndex::Forest(self.index.build(n_trees, seed))
        };
        (self.words, index)
    }
}

fn artifact_path(dir: &Path, name: &str, suffix: &str) -> PathBuf {
    dir.join(format!("{name}{suffix}"))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> SearchResult<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, value)?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> SearchResult<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Write the three artifacts of a shard.
pub fn save_artifacts(
    dir: &Path,
    name: &str,
    vocabulary: &[String],
    index: &StoredIndex,
    docs_per_year: &DocsPerYear,
) -> SearchResult<()> {
    if index.len() != vocabulary.len() {
        return Err(SearchError::Consistency(format!(
            "shard {name}: index holds {} vectors for {} words",
            index.len(),
            vocabulary.len()
        )));
    }
    std::fs::create_dir_all(dir)?;
    write_json(&artifact_path(dir, name, VOCABULARY_SUFFIX), &vocabulary)?;
    write_json(&artifact_path(dir, name, YEARS_SUFFIX), docs_per_year)?;
    index.save(&artifact_path(dir, name, INDEX_SUFFIX))?;
    Ok(())
}

/// A loaded, read-only shard.
pub struct Shard {
    name: String,
    vocabulary: Vec<String>,
    index: Box<dyn NeighborIndex>,
    docs_per_year: DocsPerYear,
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("name", &self.name)
            .field("words", &self.vocabulary.len())
            .field("dimension", &self.index.dimension())
            .finish()
    }
}

impl Shard {
    pub fn new(
        name: impl Into<String>,
        vocabulary: Vec<String>,
        index: Box<dyn NeighborIndex>,
        docs_per_year: DocsPerYear,
    ) -> SearchResult<Self> {
        let name = name.into();
        if index.len() != vocabulary.len() {
            return Err(SearchError::Consistency(format!(
                "shard {name}: index holds {} vectors for {} words",
                index.len(),
                vocabulary.len()
            )));
        }
        Ok(Self {
            name,
            vocabulary,
            index,
            docs_per_year,
        })
    }

    pub fn load(dir: &Path, name: &str) -> SearchResult<Self> {
        let index = StoredIndex::load(&artifact_path(dir, name, INDEX_SUFFIX))?;
        let vocabulary: Vec<String> = read_json(&artifact_path(dir, name, VOCABULARY_SUFFIX))?;
        let docs_per_year: DocsPerYear = read_json(&artifact_path(dir, name, YEARS_SUFFIX))?;
        debug!(shard = name, words = vocabulary.len(), "shard loaded");
        Self::new(name, vocabulary, Box::new(index), docs_per_year)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    pub fn docs_per_year(&self) -> &DocsPerYear {
        &self.docs_per_year
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Vocabulary words among the `k` nearest to `vector` whose distance does not
    /// exceed `threshold`, closest first.
    pub fn matching_words(&self, vector: &[f32], k: usize, threshold: f32) -> SearchResult<Vec<(&str, f32)>> {
        let neighbors = self.index.nearest(vector, k)?;
        neighbors
            .into_iter()
            .filter(|n| n.distance <= threshold)
            .map(|n| {
                self.vocabulary
                    .get(n.position)
                    .map(|w| (w.as_str(), n.distance))
                    .ok_or_else(|| {
                        SearchError::Consistency(format!(
                            "shard {}: index position {} outside vocabulary of {}",
                            self.name,
                            n.position,
                            self.vocabulary.len()
                        ))
                    })
            })
            .collect()
    }
}

/// Every loaded shard, ordered by name.
#[derive(Debug, Default)]
pub struct ShardSet {
    shards: Vec<Shard>,
}

impl ShardSet {
    pub fn new(mut shards: Vec<Shard>) -> Self {
        shards.sort_by(|a, b| a.name.cmp(&b.name));
        Self { shards }
    }

    /// Load every shard that has an index file in `dir`. A missing directory is an
    /// empty set.
    pub fn load_all(dir: &Path) -> SearchResult<Self> {
        if !dir.exists() {
            return Ok(Self::default());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let file_name = entry?.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(name) = file_name.strip_suffix(INDEX_SUFFIX) {
                names.push(name.to_string());
            }
        }
        names.sort();
        let shards = names
            .iter()
            .map(|name| Shard::load(dir, name))
            .collect::<SearchResult<Vec<_>>>()?;
        Ok(Self::new(shards))
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Shard> {
        self.shards.iter()
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn names(&self) -> Vec<&str> {
        self.shards.iter().map(Shard::name).collect()
    }

    /// Documents per year across all shards.
    pub fn docs_per_year(&self) -> DocsPerYear {
        let mut merged = DocsPerYear::new();
        for shard in &self.shards {
            for (&year, &docs) in shard.docs_per_year() {
                *merged.entry(year).or_insert(0) += docs;
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ann::FlatIndex;

    fn builder_with(words: &[&str]) -> VocabularyBuilder {
        let mut builder = VocabularyBuilder::new(3, 32);
        for w in words {
            builder.add_word(w).unwrap();
        }
        builder
    }

    #[test]
    fn test_add_if_absent_returns_existing_position() {
        let mut builder = VocabularyBuilder::new(3, 32);
        let agua = encode("agua", 3);
        assert_eq!(builder.add_if_absent("agua", &agua).unwrap(), 0);
        assert_eq!(builder.add_word("peste").unwrap(), 1);
        assert_eq!(builder.add_if_absent("agua", &agua).unwrap(), 0);
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn test_finish_picks_backend_by_size() {
        let (words, index) = builder_with(&["agua", "peste"]).finish(10, 1);
        assert_eq!(words, vec!["agua", "peste"]);
        assert!(matches!(index, StoredIndex::Flat(_)));

        let mut big = VocabularyBuilder::new(3, 2);
        for w in ["agua", "peste", "colera", "fiebre", "gripe"] {
            big.add_word(w).unwrap();
        }
        let (_, index) = big.finish(4, 1);
        assert!(matches!(index, StoredIndex::Forest(_)));
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_matching_words_applies_threshold() {
        let (words, index) = builder_with(&["agua", "aguas", "ministerio"]).finish(4, 1);
        let shard = Shard::new("s", words, Box::new(index), DocsPerYear::new()).unwrap();
        let q = encode("Agua", 3).to_f32();

        let matched = shard.matching_words(&q, 10, 0.4).unwrap();
        let names: Vec<&str> = matched.iter().map(|(w, _)| *w).collect();
        assert_eq!(names, vec!["agua"]);

        // Everything lies within the maximum angular distance
        assert_eq!(shard.matching_words(&q, 10, 2.0).unwrap().len(), 3);
    }

    #[test]
    fn test_shard_rejects_length_mismatch() {
        let index = FlatIndex::new(feature_len(3));
        let err = Shard::new("s", vec!["agua".into()], Box::new(index), DocsPerYear::new()).unwrap_err();
        assert!(matches!(err, SearchError::Consistency(_)));
    }

    #[test]
    fn test_artifacts_roundtrip_and_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let years_a: DocsPerYear = [(1890, 2)].into_iter().collect();
        let years_b: DocsPerYear = [(1890, 1), (1891, 5)].into_iter().collect();

        let (words, index) = builder_with(&["agua", "peste"]).finish(4, 1);
        save_artifacts(dir.path(), "reinado_b", &words, &index, &years_b).unwrap();
        let (words, index) = builder_with(&["colera"]).finish(4, 1);
        save_artifacts(dir.path(), "reinado_a", &words, &index, &years_a).unwrap();
        // Incomplete shard without an index file is ignored
        std::fs::write(dir.path().join("partial.vocab.json"), "[]").unwrap();

        let set = ShardSet::load_all(dir.path()).unwrap();
        assert_eq!(set.names(), vec!["reinado_a", "reinado_b"]);
        assert_eq!(set.shards()[1].vocabulary(), &["agua".to_string(), "peste".to_string()]);
        assert_eq!(
            set.docs_per_year(),
            [(1890, 3), (1891, 5)].into_iter().collect::<DocsPerYear>()
        );
    }

    #[test]
    fn test_missing_artifact_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let set = ShardSet::load_all(&dir.path().join("nope")).unwrap();
        assert!(set.is_empty());
    }
}
