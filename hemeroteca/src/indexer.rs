//! Build phase: corpus subfolders → shard artifacts + repetition rows
//!
//! Each subfolder of the corpus root is one shard. Shards are built in parallel;
//! a shard's rows and its indexed mark are committed together, so a shard that
//! is marked indexed is complete and is skipped on the next run.

use crate::config::Config;
use crate::corpus::{document_id, list_documents, list_shards, load_document, DocumentRecord};
use crate::database::{RepetitionRecord, RepetitionStore};
use crate::encoding::normalize;
use crate::error::SearchResult;
use crate::progress::{NoProgress, ProgressObserver};
use crate::shard::{save_artifacts, VocabularyBuilder};
use crate::timeline::DocsPerYear;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ShardReport {
    pub name: String,
    /// Documents read successfully.
    pub documents: usize,
    pub vocabulary: usize,
    pub rows: usize,
    /// Documents that could not be read, with the reason.
    pub errors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub built: Vec<ShardReport>,
    /// Shards already marked indexed.
    pub skipped: Vec<String>,
    pub unique_index_created: bool,
}

impl BuildReport {
    pub fn total_rows(&self) -> usize {
        self.built.iter().map(|s| s.rows).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.built.iter().map(|s| s.errors.len()).sum()
    }
}

/// Occurrences keyed by `(word, document, page, region)`, with the document year.
type OccurrenceCounts = HashMap<(String, String, String, String), (i32, u64)>;

pub struct ShardIndexer<'a> {
    store: &'a RepetitionStore,
    config: &'a Config,
    observer: &'a dyn ProgressObserver,
}

impl<'a> ShardIndexer<'a> {
    pub fn new(store: &'a RepetitionStore, config: &'a Config) -> Self {
        Self {
            store,
            config,
            observer: &NoProgress,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn ProgressObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Build every shard under `corpus_root` not yet indexed.
    pub fn run(&self, corpus_root: &Path) -> SearchResult<BuildReport> {
        let started = Instant::now();
        let mut report = BuildReport::default();

        let mut pending = Vec::new();
        for name in list_shards(corpus_root)? {
            if self.store.is_shard_indexed(&name)? {
                info!(shard = %name, "shard already indexed, skipping");
                report.skipped.push(name);
            } else {
                pending.push(name);
            }
        }

        report.built = pending
            .par_iter()
            .map(|name| self.build_shard(corpus_root, name))
            .collect::<SearchResult<Vec<_>>>()?;

        if self.config.create_unique_index {
            report.unique_index_created = self.store.create_uniqueness_index()?;
        }

        info!(
            built = report.built.len(),
            skipped = report.skipped.len(),
            rows = report.total_rows(),
            failed_documents = report.total_errors(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "build finished"
        );
        Ok(report)
    }

    fn build_shard(&self, corpus_root: &Path, name: &str) -> SearchResult<ShardReport> {
        let started = Instant::now();
        let documents = list_documents(&corpus_root.join(name))?;
        self.observer.task_started(name, documents.len() as u64);

        let mut builder = VocabularyBuilder::new(self.config.encoding_levels, self.config.leaf_size);
        let mut counts = OccurrenceCounts::new();
        let mut docs_per_year = DocsPerYear::new();
        let mut report = ShardReport {
            name: name.to_string(),
            ..ShardReport::default()
        };

        for path in &documents {
            let id = document_id(corpus_root, path);
            let loaded = load_document(path).and_then(|record| {
                let year = record.year()?;
                Ok((record, year))
            });
            match loaded {
                Ok((record, year)) => {
                    *docs_per_year.entry(year).or_insert(0) += 1;
                    count_words(&record, &id, year, &mut builder, &mut counts)?;
                    report.documents += 1;
                }
                Err(e) => {
                    warn!(shard = name, document = %id, error = %e, "document skipped");
                    report.errors.insert(id, e.to_string());
                }
            }
            self.observer.advance(name, 1);
        }

        let (vocabulary, index) = builder.finish(self.config.n_trees, self.config.seed);
        save_artifacts(&self.config.artifact_dir, name, &vocabulary, &index, &docs_per_year)?;

        let records: Vec<RepetitionRecord> = counts
            .into_iter()
            .map(|((word, document, page, region), (year, count))| RepetitionRecord {
                word,
                document,
                year,
                page,
                region,
                count,
            })
            .collect();
        report.vocabulary = vocabulary.len();
        report.rows = self.store.insert_shard(name, &records)?;

        self.observer.task_finished(name);
        info!(
            shard = name,
            documents = report.documents,
            vocabulary = report.vocabulary,
            rows = report.rows,
            failed_documents = report.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "shard built"
        );
        Ok(report)
    }
}

fn count_words(
    record: &DocumentRecord,
    document: &str,
    year: i32,
    builder: &mut VocabularyBuilder,
    counts: &mut OccurrenceCounts,
) -> SearchResult<()> {
    for section in record.sections() {
        for token in section.text.split_whitespace() {
            let word = normalize(token);
            if word.is_empty() {
                continue;
            }
            builder.add_word(&word)?;
            let key = (word, document.to_string(), section.page.to_string(), section.region.clone());
            counts.entry(key).or_insert((year, 0)).1 += 1;
        }
    }
    Ok(())
}
