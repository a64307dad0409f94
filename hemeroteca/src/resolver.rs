//! Query word → matched vocabulary → aggregated locations

use crate::database::{QueryGuard, RepetitionStore};
use crate::encoding::encode;
use crate::error::{SearchError, SearchResult};
use crate::location::LocationMap;
use crate::result::QueryResult;
use crate::shard::ShardSet;
use crate::timeline::YearHistogram;
use rayon::prelude::*;
use std::collections::BTreeSet;
use tracing::debug;

pub struct MatchResolver<'a> {
    store: &'a RepetitionStore,
    shards: &'a ShardSet,
    levels: usize,
}

impl<'a> MatchResolver<'a> {
    pub fn new(store: &'a RepetitionStore, shards: &'a ShardSet, levels: usize) -> Self {
        Self { store, shards, levels }
    }

    /// Resolve `word` against every shard.
    ///
    /// Vocabulary entries among each shard's `k` nearest within `threshold` are
    /// looked up once each, however many shards report them.
    pub fn resolve(&self, word: &str, k: usize, threshold: f32) -> SearchResult<QueryResult> {
        self.resolve_with(word, k, threshold, None)
    }

    /// [`resolve`](Self::resolve) that stops, and interrupts running store
    /// statements, once the guard is cancelled.
    pub fn resolve_interruptible(
        &self,
        word: &str,
        k: usize,
        threshold: f32,
        guard: &QueryGuard,
    ) -> SearchResult<QueryResult> {
        self.resolve_with(word, k, threshold, Some(guard))
    }

    fn resolve_with(
        &self,
        word: &str,
        k: usize,
        threshold: f32,
        guard: Option<&QueryGuard>,
    ) -> SearchResult<QueryResult> {
        let check_cancelled = || {
            if guard.is_some_and(QueryGuard::is_cancelled) {
                Err(SearchError::Cancelled)
            } else {
                Ok(())
            }
        };

        let vector = encode(word, self.levels).to_f32();

        // Index queries are read-only and independent; fold order stays shard order
        let per_shard: Vec<Vec<String>> = self
            .shards
            .shards()
            .par_iter()
            .map(|shard| -> SearchResult<Vec<String>> {
                check_cancelled()?;
                let matched = shard.matching_words(&vector, k, threshold)?;
                Ok(matched.into_iter().map(|(w, _)| w.to_string()).collect())
            })
            .collect::<SearchResult<_>>()?;

        let mut vocabulary = BTreeSet::new();
        let mut locations = LocationMap::new();
        let mut years = YearHistogram::new();

        for matched in per_shard {
            for vocabulary_word in matched {
                if vocabulary.contains(&vocabulary_word) {
                    continue;
                }
                check_cancelled()?;
                let rows = match guard {
                    Some(guard) => self.store.lookup_by_word_interruptible(&vocabulary_word, guard)?,
                    None => self.store.lookup_by_word(&vocabulary_word)?,
                };
                for row in rows {
                    locations.insert_if_absent(row.location(), ());
                    years.add(row.year, row.total);
                }
                vocabulary.insert(vocabulary_word);
            }
        }

        let result = QueryResult::from_locations(locations, vocabulary, years);
        result.check_consistency()?;
        debug!(
            word,
            matched = result.vocabulary.len(),
            documents = result.documents.len(),
            locations = result.locations.len(),
            "word resolved"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ann::{FlatIndex, IndexError, IndexResult, Neighbor, NeighborIndex};
    use crate::database::RepetitionRecord;
    use crate::encoding::feature_len;
    use crate::location::LocationKey;
    use crate::shard::{Shard, VocabularyBuilder};
    use crate::timeline::DocsPerYear;

    fn shard(name: &str, words: &[&str]) -> Shard {
        let mut builder = VocabularyBuilder::new(3, 32);
        for w in words {
            builder.add_word(w).unwrap();
        }
        let (vocabulary, index) = builder.finish(4, 1);
        Shard::new(name, vocabulary, Box::new(index), DocsPerYear::new()).unwrap()
    }

    fn record(word: &str, document: &str, year: i32, region: &str, count: u64) -> RepetitionRecord {
        RepetitionRecord {
            word: word.into(),
            document: document.into(),
            year,
            page: "0".into(),
            region: region.into(),
            count,
        }
    }

    #[test]
    fn test_resolves_accented_query() {
        let store = RepetitionStore::open_in_memory().unwrap();
        store.insert(&record("agua", "a.json", 1890, "r1", 1)).unwrap();
        let shards = ShardSet::new(vec![shard("s", &["agua", "ministerio"])]);

        let result = MatchResolver::new(&store, &shards, 3).resolve("Água", 10, 0.4).unwrap();
        assert_eq!(result.vocabulary, BTreeSet::from(["agua".to_string()]));
        assert!(result.locations.contains(&LocationKey::new("a.json", "0", "r1")));
        assert_eq!(result.years.get(1890), 1);
        assert_eq!(result.years.total(), 1);
    }

    #[test]
    fn test_word_in_several_shards_counted_once() {
        let store = RepetitionStore::open_in_memory().unwrap();
        store.insert(&record("agua", "a.json", 1890, "r1", 2)).unwrap();
        store.insert(&record("agua", "b.json", 1891, "r1", 3)).unwrap();
        let shards = ShardSet::new(vec![shard("a", &["agua"]), shard("b", &["peste", "agua"])]);

        let result = MatchResolver::new(&store, &shards, 3).resolve("agua", 10, 0.4).unwrap();
        assert_eq!(result.years.total(), 5);
        assert_eq!(result.documents.len(), 2);
    }

    #[test]
    fn test_no_match_is_empty_result() {
        let store = RepetitionStore::open_in_memory().unwrap();
        let shards = ShardSet::new(vec![shard("s", &["ministerio"])]);
        let result = MatchResolver::new(&store, &shards, 3).resolve("agua", 10, 0.4).unwrap();
        assert!(result.is_empty());
        assert!(result.vocabulary.is_empty());
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let store = RepetitionStore::open_in_memory().unwrap();
        let shards = ShardSet::new(vec![shard("s", &["agua"])]);
        let err = MatchResolver::new(&store, &shards, 2).resolve("agua", 10, 0.4).unwrap_err();
        assert!(matches!(
            err,
            SearchError::Index(IndexError::DimensionMismatch { expected: 266, actual: 114 })
        ));
    }

    #[test]
    fn test_vocabulary_out_of_range_is_consistency_error() {
        // An index with one vector more than the vocabulary, bypassing Shard::new checks
        struct Lying(FlatIndex);
        impl NeighborIndex for Lying {
            fn dimension(&self) -> usize {
                self.0.dimension()
            }
            fn len(&self) -> usize {
                self.0.len() - 1
            }
            fn nearest(&self, v: &[f32], k: usize) -> IndexResult<Vec<Neighbor>> {
                self.0.nearest(v, k)
            }
        }
        let mut flat = FlatIndex::new(feature_len(3));
        flat.add_item(&encode("agua", 3).to_f32()).unwrap();
        flat.add_item(&encode("aguas", 3).to_f32()).unwrap();
        let shard = Shard::new("s", vec!["aguas".into()], Box::new(Lying(flat)), DocsPerYear::new()).unwrap();

        let store = RepetitionStore::open_in_memory().unwrap();
        let shards = ShardSet::new(vec![shard]);
        let err = MatchResolver::new(&store, &shards, 3).resolve("agua", 10, 2.0).unwrap_err();
        assert!(matches!(err, SearchError::Consistency(_)));
    }

    #[test]
    fn test_cancelled_guard_stops_resolution() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let store = RepetitionStore::open_in_memory().unwrap();
        let shards = ShardSet::new(vec![shard("s", &["agua"])]);
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let guard = QueryGuard::new(token, rt.handle().clone());

        let err = MatchResolver::new(&store, &shards, 3)
            .resolve_interruptible("agua", 10, 0.4, &guard)
            .unwrap_err();
        assert!(matches!(err, SearchError::Cancelled));
    }
}
