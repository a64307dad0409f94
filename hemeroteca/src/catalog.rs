//! External reference URLs for documents

use crate::corpus::load_document;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

/// Source of the public URL of a document.
pub trait DocumentCatalog: Send + Sync {
    fn reference_url(&self, document: &str) -> Option<String>;
}

impl DocumentCatalog for HashMap<String, String> {
    fn reference_url(&self, document: &str) -> Option<String> {
        self.get(document).cloned()
    }
}

/// Reads `document_href` from the document file under the corpus root and
/// prefixes it with the publisher's base URL. Answers are cached per document.
pub struct JsonCatalog {
    root: PathBuf,
    base_url: String,
    cache: RwLock<HashMap<String, Option<String>>>,
}

impl JsonCatalog {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn fetch(&self, document: &str) -> Option<String> {
        match load_document(&self.root.join(document)) {
            Ok(record) if record.document_href.is_empty() => None,
            Ok(record) => Some(format!("{}{}", self.base_url, record.document_href)),
            Err(e) => {
                warn!(document, error = %e, "no reference URL for document");
                None
            }
        }
    }
}

impl DocumentCatalog for JsonCatalog {
    fn reference_url(&self, document: &str) -> Option<String> {
        if let Some(cached) = self.cache.read().get(document) {
            return cached.clone();
        }
        let url = self.fetch(document);
        self.cache.write().insert(document.to_string(), url.clone());
        url
    }
}
