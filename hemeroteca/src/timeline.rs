//! Year histograms and the year series reported to consumers

use crate::combine::{CombineMode, CombinedResult};
use crate::result::QueryResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Documents published per year, as stored in the shard manifests.
pub type DocsPerYear = BTreeMap<i32, u64>;

/// Occurrence count per publication year.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearHistogram(BTreeMap<i32, u64>);

impl YearHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, year: i32, count: u64) {
        *self.0.entry(year).or_insert(0) += count;
    }

    pub fn get(&self, year: i32) -> u64 {
        self.0.get(&year).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, u64)> + '_ {
        self.0.iter().map(|(&y, &c)| (y, c))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct YearPoint {
    pub year: i32,
    pub value: f64,
}

/// One point per manifest year, in ascending order. Years without hits are 0.
///
/// With `normalize`, counts are divided by the documents published that year.
/// A manifest year listing no documents keeps the raw count.
pub fn year_series(histogram: &YearHistogram, docs_per_year: &DocsPerYear, normalize: bool) -> Vec<YearPoint> {
    docs_per_year
        .iter()
        .map(|(&year, &docs)| {
            let count = histogram.get(year) as f64;
            let value = if normalize && docs > 0 {
                count / docs as f64
            } else {
                count
            };
            YearPoint { year, value }
        })
        .collect()
}

/// Single-word report.
#[derive(Debug, Clone, Serialize)]
pub struct WordTimeline {
    pub word: String,
    pub normalized: bool,
    pub series: Vec<YearPoint>,
    pub result: QueryResult,
}

/// Multi-word report.
#[derive(Debug, Clone, Serialize)]
pub struct CombinedTimeline {
    pub words: Vec<String>,
    pub mode: CombineMode,
    pub normalized: bool,
    pub series: Vec<YearPoint>,
    pub combined: CombinedResult,
}
