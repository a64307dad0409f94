//! Boolean combination of per-word results
//!
//! AND keeps the regions every word was found in; OR keeps every document any
//! word was found in. The final counts come from the store, restricted to the
//! matched vocabulary of all words.

use crate::catalog::DocumentCatalog;
use crate::database::{QueryGuard, RepetitionStore};
use crate::error::{SearchError, SearchResult};
use crate::location::LocationKey;
use crate::result::QueryResult;
use crate::timeline::YearHistogram;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CombineMode {
    And,
    Or,
}

impl FromStr for CombineMode {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Ok(Self::And),
            "OR" => Ok(Self::Or),
            _ => Err(SearchError::InvalidInput(format!(
                "unknown combine mode {s:?}, expected AND or OR"
            ))),
        }
    }
}

impl fmt::Display for CombineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => f.write_str("AND"),
            Self::Or => f.write_str("OR"),
        }
    }
}

/// Fold per-word results left to right.
///
/// The year histogram of the combination is left empty; it is rebuilt from the
/// aggregation query by [`QueryCombiner::aggregate`].
pub fn combine(terms: Vec<QueryResult>, mode: CombineMode) -> SearchResult<QueryResult> {
    let mut terms = terms.into_iter();
    let Some(first) = terms.next() else {
        return Ok(QueryResult::default());
    };

    let mut vocabulary = first.vocabulary;
    let mut locations = first.locations;
    let mut documents = first.documents;

    for term in terms {
        vocabulary.extend(term.vocabulary);
        match mode {
            CombineMode::And => {
                if locations.is_empty() {
                    continue;
                }
                locations = locations.intersect(&term.locations);
                documents = locations.documents();
            }
            CombineMode::Or => {
                locations = locations.union(term.locations);
                documents.extend(term.documents);
            }
        }
    }

    let combined = QueryResult {
        documents,
        locations,
        vocabulary,
        years: YearHistogram::new(),
    };
    combined.check_consistency()?;
    Ok(combined)
}

/// Where a combined hit was counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HitLocation {
    Region(LocationKey),
    Document(String),
}

impl HitLocation {
    pub fn document(&self) -> &str {
        match self {
            Self::Region(key) => &key.document,
            Self::Document(document) => document,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinedHit {
    pub location: HitLocation,
    pub year: i32,
    pub reference_url: Option<String>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CombinedResult {
    pub mode: CombineMode,
    pub result: QueryResult,
    /// Largest total first.
    pub hits: Vec<CombinedHit>,
}

/// Runs the aggregation query for a combination and annotates its hits.
pub struct QueryCombiner<'a> {
    store: &'a RepetitionStore,
    catalog: &'a dyn DocumentCatalog,
}

impl<'a> QueryCombiner<'a> {
    pub fn new(store: &'a RepetitionStore, catalog: &'a dyn DocumentCatalog) -> Self {
        Self { store, catalog }
    }

    /// Combine `terms` and aggregate the survivors.
    pub fn run(
        &self,
        terms: Vec<QueryResult>,
        mode: CombineMode,
        guard: Option<&QueryGuard>,
    ) -> SearchResult<CombinedResult> {
        let combined = combine(terms, mode)?;
        self.aggregate(combined, mode, guard)
    }

    /// Count the matched vocabulary at the surviving locations (AND) or
    /// documents (OR).
    pub fn aggregate(
        &self,
        mut combined: QueryResult,
        mode: CombineMode,
        guard: Option<&QueryGuard>,
    ) -> SearchResult<CombinedResult> {
        let words: Vec<String> = combined.vocabulary.iter().cloned().collect();
        let mut years = YearHistogram::new();

        let hits: Vec<CombinedHit> = match mode {
            CombineMode::And => {
                let locations: Vec<LocationKey> = combined.locations.sorted_keys().into_iter().cloned().collect();
                let rows = match guard {
                    Some(guard) => self.store.lookup_by_locations_interruptible(&locations, &words, guard)?,
                    None => self.store.lookup_by_locations(&locations, &words)?,
                };
                rows.into_iter()
                    .map(|row| {
                        years.add(row.year, row.total);
                        CombinedHit {
                            reference_url: self.catalog.reference_url(&row.document),
                            location: HitLocation::Region(row.location()),
                            year: row.year,
                            total: row.total,
                        }
                    })
                    .collect()
            }
            CombineMode::Or => {
                let documents: Vec<String> = combined.documents.iter().cloned().collect();
                let totals = match guard {
                    Some(guard) => self.store.lookup_by_documents_interruptible(&documents, &words, guard)?,
                    None => self.store.lookup_by_documents(&documents, &words)?,
                };
                totals
                    .into_iter()
                    .map(|doc| {
                        years.add(doc.year, doc.total);
                        CombinedHit {
                            reference_url: self.catalog.reference_url(&doc.document),
                            location: HitLocation::Document(doc.document),
                            year: doc.year,
                            total: doc.total,
                        }
                    })
                    .collect()
            }
        };

        combined.years = years;
        debug!(
            %mode,
            words = words.len(),
            documents = combined.documents.len(),
            hits = hits.len(),
            "combination aggregated"
        );
        Ok(CombinedResult {
            mode,
            result: combined,
            hits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::RepetitionRecord;
    use crate::location::LocationMap;
    use std::collections::{BTreeSet, HashMap};

    fn key(d: &str, p: &str, r: &str) -> LocationKey {
        LocationKey::new(d, p, r)
    }

    fn term(word: &str, keys: &[LocationKey]) -> QueryResult {
        let locations: LocationMap = keys.iter().cloned().collect();
        let mut years = YearHistogram::new();
        years.add(1890, 1);
        QueryResult::from_locations(locations, BTreeSet::from([word.to_string()]), years)
    }

    fn record(word: &str, document: &str, region: &str, count: u64) -> RepetitionRecord {
        RepetitionRecord {
            word: word.into(),
            document: document.into(),
            year: 1890,
            page: "0".into(),
            region: region.into(),
            count,
        }
    }

    #[test]
    fn test_mode_parses_case_insensitively() {
        assert_eq!("and".parse::<CombineMode>().unwrap(), CombineMode::And);
        assert_eq!("Or".parse::<CombineMode>().unwrap(), CombineMode::Or);
        assert!(matches!(
            "xor".parse::<CombineMode>(),
            Err(SearchError::InvalidInput(_))
        ));
        assert_eq!(CombineMode::And.to_string(), "AND");
    }

    #[test]
    fn test_and_keeps_shared_regions_only() {
        let a = term("agua", &[key("doc1", "0", "r1"), key("doc1", "0", "r2")]);
        let b = term("peste", &[key("doc1", "0", "r1")]);
        let combined = combine(vec![a, b], CombineMode::And).unwrap();
        assert_eq!(combined.locations.sorted_keys(), vec![&key("doc1", "0", "r1")]);
        assert_eq!(combined.documents, BTreeSet::from(["doc1".to_string()]));
        assert_eq!(combined.vocabulary.len(), 2);
        assert!(combined.years.is_empty());
    }

    #[test]
    fn test_and_stays_empty_once_empty() {
        let a = term("a", &[key("d1", "0", "r1")]);
        let b = term("b", &[key("d2", "0", "r1")]);
        let c = term("c", &[key("d1", "0", "r1")]);
        let combined = combine(vec![a, b, c], CombineMode::And).unwrap();
        assert!(combined.is_empty());
        assert!(combined.documents.is_empty());
        assert_eq!(combined.vocabulary.len(), 3);
    }

    #[test]
    fn test_or_unions_locations_and_documents() {
        let a = term("a", &[key("d1", "0", "r1")]);
        let b = term("b", &[key("d1", "0", "r2"), key("d2", "1", "r1")]);
        let combined = combine(vec![a, b], CombineMode::Or).unwrap();
        assert_eq!(combined.locations.len(), 3);
        assert_eq!(
            combined.documents,
            BTreeSet::from(["d1".to_string(), "d2".to_string()])
        );
    }

    #[test]
    fn test_no_terms_is_empty() {
        assert!(combine(Vec::new(), CombineMode::Or).unwrap().is_empty());
    }

    #[test]
    fn test_aggregate_and_counts_every_matched_word_per_region() {
        let store = RepetitionStore::open_in_memory().unwrap();
        store.insert(&record("agua", "doc1", "r1", 2)).unwrap();
        store.insert(&record("agua", "doc1", "r2", 4)).unwrap();
        store.insert(&record("peste", "doc1", "r1", 1)).unwrap();
        let catalog: HashMap<String, String> =
            HashMap::from([("doc1".to_string(), "https://boe.es/doc1".to_string())]);

        let a = term("agua", &[key("doc1", "0", "r1"), key("doc1", "0", "r2")]);
        let b = term("peste", &[key("doc1", "0", "r1")]);
        let combined = QueryCombiner::new(&store, &catalog)
            .run(vec![a, b], CombineMode::And, None)
            .unwrap();

        assert_eq!(combined.hits.len(), 1);
        let hit = &combined.hits[0];
        assert_eq!(hit.location, HitLocation::Region(key("doc1", "0", "r1")));
        assert_eq!(hit.total, 3);
        assert_eq!(hit.reference_url.as_deref(), Some("https://boe.es/doc1"));
        assert_eq!(combined.result.years.get(1890), 3);
    }

    #[test]
    fn test_aggregate_or_counts_per_document() {
        let store = RepetitionStore::open_in_memory().unwrap();
        store.insert(&record("agua", "doc1", "r1", 2)).unwrap();
        store.insert(&record("peste", "doc2", "r1", 5)).unwrap();
        store.insert(&record("rey", "doc2", "r1", 100)).unwrap();
        let catalog: HashMap<String, String> = HashMap::new();

        let a = term("agua", &[key("doc1", "0", "r1")]);
        let b = term("peste", &[key("doc2", "0", "r1")]);
        let combined = QueryCombiner::new(&store, &catalog)
            .run(vec![a, b], CombineMode::Or, None)
            .unwrap();

        let totals: Vec<(&str, u64)> = combined
            .hits
            .iter()
            .map(|h| (h.location.document(), h.total))
            .collect();
        assert_eq!(totals, vec![("doc2", 5), ("doc1", 2)]);
        assert!(combined.hits.iter().all(|h| h.reference_url.is_none()));
        assert_eq!(combined.result.years.total(), 7);
    }

    #[test]
    fn test_hit_location_serializes_tagged() {
        let json = serde_json::to_value(HitLocation::Document("doc1".into())).unwrap();
        assert_eq!(json, serde_json::json!({"document": "doc1"}));
    }
}
