//! Direct-scan fuzzy matching over document text
//!
//! Used when no shard index exists: every document is read and scanned for
//! spelling variants of the query words with a bounded edit distance.

use crate::corpus::load_document;
use crate::distance::{fuzzy_threshold, length_slack, osa_distance_bounded};
use crate::error::SearchError;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Compare whole whitespace-separated tokens.
    Token,
    /// Slide a window over the text with all whitespace removed.
    Contiguous,
}

impl FromStr for ScanMode {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "token" | "sep" => Ok(Self::Token),
            "contiguous" | "join" => Ok(Self::Contiguous),
            _ => Err(SearchError::InvalidInput(format!(
                "unknown scan mode {s:?}, expected token or contiguous"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FuzzyMatch {
    /// Token index, or character offset in the whitespace-free text.
    pub position: usize,
    pub text: String,
    pub exact: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WordHits {
    Tokens(Vec<FuzzyMatch>),
    Clusters(Vec<Vec<FuzzyMatch>>),
}

impl WordHits {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Tokens(matches) => matches.is_empty(),
            Self::Clusters(clusters) => clusters.is_empty(),
        }
    }
}

/// Hits per query word.
pub type TextHits = BTreeMap<String, WordHits>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub matches: BTreeMap<String, TextHits>,
    /// Documents that could not be read, with the reason.
    pub errors: BTreeMap<String, String>,
}

/// Scan document files. A document that fails to load is reported in
/// [`ScanReport::errors`] and the rest are still scanned.
pub fn scan(paths: &[PathBuf], words: &[String], mode: ScanMode) -> ScanReport {
    let outcomes: Vec<(String, Result<TextHits, String>)> = paths
        .par_iter()
        .map(|path| {
            let key = path.display().to_string();
            let outcome = load_document(path)
                .map(|record| scan_text(&record.document_text(), words, mode))
                .map_err(|e| e.to_string());
            (key, outcome)
        })
        .collect();

    let mut report = ScanReport::default();
    for (key, outcome) in outcomes {
        match outcome {
            Ok(hits) => {
                report.matches.insert(key, hits);
            }
            Err(e) => {
                warn!(document = %key, error = %e, "document skipped by scan");
                report.errors.insert(key, e);
            }
        }
    }
    debug!(
        documents = report.matches.len(),
        failed = report.errors.len(),
        ?mode,
        "scan finished"
    );
    report
}

/// Scan one text for every query word.
pub fn scan_text(text: &str, words: &[String], mode: ScanMode) -> TextHits {
    match mode {
        ScanMode::Token => {
            let tokens: Vec<Vec<char>> = text.split_whitespace().map(|t| t.chars().collect()).collect();
            words
                .iter()
                .map(|word| (word.clone(), WordHits::Tokens(token_matches(&tokens, word))))
                .collect()
        }
        ScanMode::Contiguous => {
            let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
            words
                .iter()
                .map(|word| {
                    let clusters = cluster_matches(window_matches(&chars, word));
                    (word.clone(), WordHits::Clusters(clusters))
                })
                .collect()
        }
    }
}

/// Case-sensitive comparison of whole tokens.
fn token_matches(tokens: &[Vec<char>], word: &str) -> Vec<FuzzyMatch> {
    let query: Vec<char> = word.chars().collect();
    let max_edits = fuzzy_threshold(query.len());
    let slack = length_slack(query.len());

    tokens
        .iter()
        .enumerate()
        .filter(|(_, token)| token.len() + slack >= query.len())
        .filter_map(|(position, token)| {
            osa_distance_bounded(&query, token, max_edits).map(|distance| FuzzyMatch {
                position,
                text: token.iter().collect(),
                exact: distance == 0,
            })
        })
        .collect()
}

/// Windows of the query's length at every offset; the last ones are shorter.
fn window_matches(chars: &[char], word: &str) -> Vec<FuzzyMatch> {
    let query: Vec<char> = word.chars().collect();
    if query.is_empty() {
        return Vec::new();
    }
    let max_edits = fuzzy_threshold(query.len());
    let folded = word.to_lowercase();

    (0..chars.len())
        .filter_map(|start| {
            let window = &chars[start..(start + query.len()).min(chars.len())];
            let text: String = window.iter().collect();
            let exact = text.to_lowercase() == folded;
            (exact || osa_distance_bounded(&query, window, max_edits).is_some()).then_some(FuzzyMatch {
                position: start,
                text,
                exact,
            })
        })
        .collect()
}

/// Group matches in discovery order. A match joins the first cluster holding a
/// member no further away than the match's own length, else starts a new one.
pub fn cluster_matches(matches: Vec<FuzzyMatch>) -> Vec<Vec<FuzzyMatch>> {
    let mut clusters: Vec<Vec<FuzzyMatch>> = Vec::new();
    for m in matches {
        let reach = m.text.chars().count();
        let home = clusters
            .iter_mut()
            .find(|cluster| cluster.iter().any(|member| member.position.abs_diff(m.position) <= reach));
        match home {
            Some(cluster) => cluster.push(m),
            None => clusters.push(vec![m]),
        }
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(ws: &[&str]) -> Vec<String> {
        ws.iter().map(|w| w.to_string()).collect()
    }

    fn token_hits(text: &str, word: &str) -> Vec<FuzzyMatch> {
        match scan_text(text, &words(&[word]), ScanMode::Token).remove(word) {
            Some(WordHits::Tokens(matches)) => matches,
            other => panic!("unexpected hits {other:?}"),
        }
    }

    fn cluster_hits(text: &str, word: &str) -> Vec<Vec<FuzzyMatch>> {
        match scan_text(text, &words(&[word]), ScanMode::Contiguous).remove(word) {
            Some(WordHits::Clusters(clusters)) => clusters,
            other => panic!("unexpected hits {other:?}"),
        }
    }

    fn m(position: usize, text: &str) -> FuzzyMatch {
        FuzzyMatch {
            position,
            text: text.into(),
            exact: false,
        }
    }

    #[test]
    fn test_mode_names() {
        assert_eq!("sep".parse::<ScanMode>().unwrap(), ScanMode::Token);
        assert_eq!("Contiguous".parse::<ScanMode>().unwrap(), ScanMode::Contiguous);
        assert!("fuzzy".parse::<ScanMode>().is_err());
    }

    #[test]
    fn test_token_edit_boundary() {
        let hits = token_hits("Aguas Agxy Axyz Agua", "Agua");
        let found: Vec<(usize, &str, bool)> = hits.iter().map(|h| (h.position, h.text.as_str(), h.exact)).collect();
        assert_eq!(
            found,
            vec![(0, "Aguas", false), (1, "Agxy", false), (3, "Agua", true)]
        );
    }

    #[test]
    fn test_token_mode_is_case_sensitive() {
        assert!(token_hits("AGUA", "agua").is_empty());
    }

    #[test]
    fn test_token_length_prune() {
        // 5 + floor(0.4 * 12) < 12
        assert!(token_hits("acaec", "acaecimiento").is_empty());
        assert_eq!(token_hits("acaecimient", "acaecimiento").len(), 1);
    }

    #[test]
    fn test_every_query_word_reported() {
        let hits = scan_text("nada", &words(&["agua", "peste"]), ScanMode::Token);
        assert_eq!(hits.len(), 2);
        assert!(hits.values().all(WordHits::is_empty));
    }

    #[test]
    fn test_contiguous_groups_neighbouring_windows() {
        let clusters = cluster_hits("zzzz zzzz agua", "agua");
        assert_eq!(clusters.len(), 1);
        let positions: Vec<usize> = clusters[0].iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![7, 8, 9, 10]);
        let exact: Vec<usize> = clusters[0].iter().filter(|h| h.exact).map(|h| h.position).collect();
        assert_eq!(exact, vec![8]);
        assert_eq!(clusters[0][3].text, "ua");
    }

    #[test]
    fn test_contiguous_exact_ignores_case() {
        let clusters = cluster_hits("zzzzzzzz AGUA", "agua");
        assert_eq!(clusters, vec![vec![FuzzyMatch {
            position: 8,
            text: "AGUA".into(),
            exact: true,
        }]]);
    }

    #[test]
    fn test_cluster_joins_first_qualifying_only() {
        let clusters = cluster_matches(vec![m(0, "abcd"), m(10, "abcd"), m(5, "abcdef"), m(14, "ab")]);
        let positions: Vec<Vec<usize>> = clusters
            .iter()
            .map(|c| c.iter().map(|h| h.position).collect())
            .collect();
        assert_eq!(positions, vec![vec![0, 5], vec![10], vec![14]]);
    }

    #[test]
    fn test_scan_isolates_unreadable_documents() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        let bad = dir.path().join("bad.json");
        std::fs::write(
            &good,
            r#"{"date": "02/03/1885", "document_href": "", "pages": {"0": [{"bbox": [0, 0, 1, 1], "ocr": "el agua"}]}}"#,
        )
        .unwrap();
        std::fs::write(&bad, "{ not json").unwrap();

        let report = scan(&[good.clone(), bad.clone()], &words(&["agua"]), ScanMode::Token);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors.contains_key(&bad.display().to_string()));
        let hits = &report.matches[&good.display().to_string()]["agua"];
        assert_eq!(hits, &WordHits::Tokens(vec![FuzzyMatch {
            position: 1,
            text: "agua".into(),
            exact: true,
        }]));
    }
}
