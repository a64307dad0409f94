use crate::error::{SearchError, SearchResult};
use crate::location::LocationMap;
use crate::timeline::YearHistogram;
use serde::Serialize;
use std::collections::BTreeSet;

/// Outcome of resolving one word, or of combining several.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub documents: BTreeSet<String>,
    pub locations: LocationMap,
    /// Vocabulary entries accepted as the same word as the query.
    pub vocabulary: BTreeSet<String>,
    pub years: YearHistogram,
}

impl QueryResult {
    /// Build a result whose document set is derived from `locations`.
    pub fn from_locations(locations: LocationMap, vocabulary: BTreeSet<String>, years: YearHistogram) -> Self {
        Self {
            documents: locations.documents(),
            locations,
            vocabulary,
            years,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// The tracked document set must equal the documents of the locations.
    pub fn check_consistency(&self) -> SearchResult<()> {
        let located = self.locations.documents();
        if located != self.documents {
            let missing = located.difference(&self.documents).count();
            let extra = self.documents.difference(&located).count();
            return Err(SearchError::Consistency(format!(
                "document set disagrees with locations ({missing} missing, {extra} without locations)"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationKey;

    #[test]
    fn test_from_locations_is_consistent() {
        let locations: LocationMap = [LocationKey::new("a", "0", "r"), LocationKey::new("b", "2", "r")]
            .into_iter()
            .collect();
        let result = QueryResult::from_locations(locations, BTreeSet::new(), YearHistogram::new());
        assert_eq!(result.documents.len(), 2);
        assert!(result.check_consistency().is_ok());
    }

    #[test]
    fn test_detects_stray_document() {
        let mut result = QueryResult::default();
        result.documents.insert("ghost".into());
        assert!(matches!(
            result.check_consistency(),
            Err(SearchError::Consistency(_))
        ));
    }
}
