//! Where a word, or a combination of words, was found
//!
//! Locations are kept flat, keyed by `(document, page, region)`, so AND and OR
//! are plain map intersection and union. The nested document → page → region
//! view only exists when a map is serialized.

use serde::ser::Serializer;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LocationKey {
    pub document: String,
    pub page: String,
    pub region: String,
}

impl LocationKey {
    pub fn new(
        document: impl Into<String>,
        page: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            document: document.into(),
            page: page.into(),
            region: region.into(),
        }
    }
}

/// Nested view produced for serialization.
pub type NestedLocations<P> = BTreeMap<String, BTreeMap<String, BTreeMap<String, P>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationMap<P = ()> {
    entries: HashMap<LocationKey, P>,
}

impl<P> Default for LocationMap<P> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<P> LocationMap<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &LocationKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &LocationKey) -> Option<&P> {
        self.entries.get(key)
    }

    /// Insert unless the key is already present. Returns whether it was inserted.
    pub fn insert_if_absent(&mut self, key: LocationKey, payload: P) -> bool {
        use std::collections::hash_map::Entry;
        match self.entries.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(payload);
                true
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LocationKey, &P)> {
        self.entries.iter()
    }

    /// Keys in `(document, page, region)` order.
    pub fn sorted_keys(&self) -> Vec<&LocationKey> {
        let mut keys: Vec<&LocationKey> = self.entries.keys().collect();
        keys.sort();
        keys
    }

    /// Distinct documents holding at least one location.
    pub fn documents(&self) -> BTreeSet<String> {
        self.entries.keys().map(|k| k.document.clone()).collect()
    }

    /// Union; on a shared key the payload from `other` wins.
    pub fn union(mut self, other: Self) -> Self {
        self.entries.extend(other.entries);
        self
    }
}

impl<P: PartialEq> LocationMap<P> {
    /// Keys present in both maps with equal payloads.
    pub fn intersect(mut self, other: &Self) -> Self {
        self.entries
            .retain(|key, payload| other.entries.get(key) == Some(&*payload));
        self
    }
}

impl<P: Clone> LocationMap<P> {
    pub fn to_nested(&self) -> NestedLocations<P> {
        let mut nested: NestedLocations<P> = BTreeMap::new();
        for (key, payload) in &self.entries {
            nested
                .entry(key.document.clone())
                .or_default()
                .entry(key.page.clone())
                .or_default()
                .insert(key.region.clone(), payload.clone());
        }
        nested
    }
}

impl<P> FromIterator<(LocationKey, P)> for LocationMap<P> {
    fn from_iter<I: IntoIterator<Item = (LocationKey, P)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl FromIterator<LocationKey> for LocationMap<()> {
    fn from_iter<I: IntoIterator<Item = LocationKey>>(iter: I) -> Self {
        iter.into_iter().map(|k| (k, ())).collect()
    }
}

impl<P: Clone + Serialize> Serialize for LocationMap<P> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_nested().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(d: &str, p: &str, r: &str) -> LocationKey {
        LocationKey::new(d, p, r)
    }

    #[test]
    fn test_insert_if_absent_never_overwrites() {
        let mut map: LocationMap<u32> = LocationMap::new();
        assert!(map.insert_if_absent(key("doc1", "0", "r1"), 1));
        assert!(!map.insert_if_absent(key("doc1", "0", "r1"), 2));
        assert_eq!(map.get(&key("doc1", "0", "r1")), Some(&1));
    }

    #[test]
    fn test_intersect_requires_equal_payload() {
        let a: LocationMap<u32> = [(key("d", "0", "r1"), 1), (key("d", "0", "r2"), 2)]
            .into_iter()
            .collect();
        let b: LocationMap<u32> = [(key("d", "0", "r1"), 1), (key("d", "0", "r2"), 3)]
            .into_iter()
            .collect();
        let both = a.intersect(&b);
        assert_eq!(both.sorted_keys(), vec![&key("d", "0", "r1")]);
    }

    #[test]
    fn test_union_right_side_wins() {
        let a: LocationMap<&str> = [(key("d", "0", "r1"), "left")].into_iter().collect();
        let b: LocationMap<&str> = [(key("d", "0", "r1"), "right"), (key("e", "1", "r"), "x")]
            .into_iter()
            .collect();
        let merged = a.union(b);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get(&key("d", "0", "r1")), Some(&"right"));
    }

    #[test]
    fn test_union_keeps_regions_from_both_sides() {
        let a: LocationMap = [key("d", "0", "r1")].into_iter().collect();
        let b: LocationMap = [key("d", "0", "r2")].into_iter().collect();
        let merged = a.union(b);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.documents(), BTreeSet::from(["d".to_string()]));
    }

    #[test]
    fn test_documents_follow_keys() {
        let map: LocationMap = [key("a", "0", "r"), key("a", "1", "r"), key("b", "0", "r")]
            .into_iter()
            .collect();
        assert_eq!(
            map.documents(),
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_serializes_as_nested_view() {
        let map: LocationMap = [key("doc", "0", "[1, 2]"), key("doc", "3", "[4]")]
            .into_iter()
            .collect();
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"doc": {"0": {"[1, 2]": null}, "3": {"[4]": null}}})
        );
    }
}
