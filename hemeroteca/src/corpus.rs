//! OCR document records and corpus traversal
//!
//! A corpus root holds one subfolder per shard; every `.json` file below a shard
//! folder is one document. Document ids are paths relative to the corpus root.

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed document {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unparseable date {0:?}")]
    Date(String),
}

pub type CorpusResult<T> = Result<T, CorpusError>;

/// One OCR fragment on a page.
#[derive(Debug, Clone, Deserialize)]
pub struct Region {
    pub bbox: serde_json::Value,
    #[serde(default)]
    pub ocr: String,
    #[serde(default)]
    pub similarity: Option<f64>,
}

impl Region {
    /// Storage key of the bounding box: its compact JSON text.
    pub fn region_key(&self) -> String {
        self.bbox.to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentRecord {
    pub date: String,
    #[serde(default)]
    pub document_href: String,
    #[serde(default)]
    pub pages: BTreeMap<String, Vec<Region>>,
}

/// Text of one region with where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section<'a> {
    pub page: &'a str,
    pub region: String,
    pub text: &'a str,
}

impl DocumentRecord {
    pub fn parse(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Publication year from a `DD/MM/YYYY` date, falling back to the last
    /// `/`-separated field for dates chrono rejects (e.g. `00/00/1890`).
    pub fn year(&self) -> CorpusResult<i32> {
        let date = self.date.trim();
        if let Ok(parsed) = NaiveDate::parse_from_str(date, "%d/%m/%Y") {
            return Ok(parsed.year());
        }
        date.rsplit('/')
            .next()
            .and_then(|y| y.trim().parse::<i32>().ok())
            .ok_or_else(|| CorpusError::Date(self.date.clone()))
    }

    /// Page keys in numeric order; non-numeric keys sort after, by text.
    fn ordered_pages(&self) -> Vec<(&String, &Vec<Region>)> {
        let mut pages: Vec<_> = self.pages.iter().collect();
        pages.sort_by(|(a, _), (b, _)| {
            match (a.parse::<u64>(), b.parse::<u64>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                (Err(_), Err(_)) => a.cmp(b),
            }
        });
        pages
    }

    /// Every region of every page, pages in numeric order.
    pub fn sections(&self) -> Vec<Section<'_>> {
        self.ordered_pages()
            .into_iter()
            .flat_map(|(page, regions)| {
                regions.iter().map(move |region| Section {
                    page: page.as_str(),
                    region: region.region_key(),
                    text: region.ocr.as_str(),
                })
            })
            .collect()
    }

    /// OCR text of the whole document, regions joined by single spaces.
    pub fn document_text(&self) -> String {
        self.sections()
            .iter()
            .map(|s| s.text)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub fn load_document(path: &Path) -> CorpusResult<DocumentRecord> {
    let raw = std::fs::read_to_string(path).map_err(|source| CorpusError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    DocumentRecord::parse(&raw).map_err(|source| CorpusError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Names of the shard folders directly under `root`, sorted.
pub fn list_shards(root: &Path) -> CorpusResult<Vec<String>> {
    let io_err = |source| CorpusError::Io {
        path: root.to_path_buf(),
        source,
    };
    let mut shards = Vec::new();
    for entry in std::fs::read_dir(root).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if entry.file_type().map_err(io_err)?.is_dir() {
            shards.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    shards.sort();
    Ok(shards)
}

/// Every `.json` file below `folder`, recursively, sorted by path.
pub fn list_documents(folder: &Path) -> CorpusResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![folder.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let io_err = |source| CorpusError::Io {
            path: dir.clone(),
            source,
        };
        for entry in std::fs::read_dir(&dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Id of a document: its path relative to the corpus root, `/`-separated.
pub fn document_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "date": "14/03/1890",
        "document_href": "/datos/pdfs/BOE//1890/073/A00761-00762.pdf",
        "pages": {
            "10": [{"bbox": [5, 5, 9, 9], "ocr": "final"}],
            "2": [
                {"bbox": [0, 0, 10, 10], "ocr": "Real orden", "similarity": 0.8},
                {"bbox": [0, 20, 10, 30], "ocr": "sobre aguas"}
            ],
            "3": []
        }
    }"#;

    #[test]
    fn test_parse_and_year() {
        let doc = DocumentRecord::parse(SAMPLE).unwrap();
        assert_eq!(doc.year().unwrap(), 1890);
        assert_eq!(doc.pages.len(), 3);
        assert_eq!(doc.pages["2"][0].similarity, Some(0.8));
    }

    #[test]
    fn test_year_falls_back_to_last_field() {
        let doc = DocumentRecord::parse(r#"{"date": "00/00/1875", "pages": {}}"#).unwrap();
        assert_eq!(doc.year().unwrap(), 1875);
        let bad = DocumentRecord::parse(r#"{"date": "sin fecha", "pages": {}}"#).unwrap();
        assert!(matches!(bad.year(), Err(CorpusError::Date(_))));
    }

    #[test]
    fn test_sections_follow_numeric_page_order() {
        let doc = DocumentRecord::parse(SAMPLE).unwrap();
        let sections = doc.sections();
        let pages: Vec<&str> = sections.iter().map(|s| s.page).collect();
        assert_eq!(pages, vec!["2", "2", "10"]);
        assert_eq!(sections[0].region, "[0,0,10,10]");
        assert_eq!(doc.document_text(), "Real orden sobre aguas final");
    }

    #[test]
    fn test_listing_and_ids() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("reinado_b/nested")).unwrap();
        std::fs::create_dir_all(root.join("reinado_a")).unwrap();
        std::fs::write(root.join("reinado_b/nested/x.json"), SAMPLE).unwrap();
        std::fs::write(root.join("reinado_b/a.json"), SAMPLE).unwrap();
        std::fs::write(root.join("reinado_b/notes.txt"), "skip").unwrap();

        assert_eq!(list_shards(root).unwrap(), vec!["reinado_a", "reinado_b"]);

        let docs = list_documents(&root.join("reinado_b")).unwrap();
        let ids: Vec<String> = docs.iter().map(|p| document_id(root, p)).collect();
        assert_eq!(ids, vec!["reinado_b/a.json", "reinado_b/nested/x.json"]);
    }

    #[test]
    fn test_load_document_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_document(&path).unwrap_err();
        assert!(matches!(err, CorpusError::Json { .. }));
        assert!(err.to_string().contains("broken.json"));
    }
}
