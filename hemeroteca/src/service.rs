//! SearchService - entry point owning the store, the loaded shards and the catalog
//!
//! Async Cancellation Architecture:
//! Async searches run on spawn_blocking threads. Dropping the returned future drops
//! a DropGuard that cancels a CancellationToken; the resolver checks the token
//! between steps and in-flight SQLite statements are interrupted through it.

use crate::catalog::{DocumentCatalog, JsonCatalog};
use crate::combine::{CombineMode, CombinedResult, QueryCombiner};
use crate::config::Config;
use crate::database::{QueryGuard, RepetitionStore};
use crate::error::{SearchError, SearchResult};
use crate::indexer::{BuildReport, ShardIndexer};
use crate::progress::ProgressObserver;
use crate::resolver::MatchResolver;
use crate::result::QueryResult;
use crate::shard::ShardSet;
use crate::timeline::{year_series, CombinedTimeline, DocsPerYear, WordTimeline};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::{Arc, Once};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Fallback Tokio runtime for async calls made outside any runtime context.
/// Shared across all services and never dropped.
static FALLBACK_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create fallback tokio runtime")
});

static RAYON_INIT: Once = Once::new();

/// Size the global Rayon pool, leaving cores for Tokio.
fn init_rayon() {
    RAYON_INIT.call_once(|| {
        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        // Reserve 2 cores for Tokio, but use at least 1 thread.
        let rayon_threads = num_threads.saturating_sub(2).max(1);

        let _ = rayon::ThreadPoolBuilder::new()
            .num_threads(rayon_threads)
            .thread_name(|i| format!("hemeroteca-rayon-{}", i))
            .build_global();
    });
}

/// RAII guard that cancels a token when dropped.
struct DropGuard {
    token: CancellationToken,
}

impl DropGuard {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Uses the current runtime if available, otherwise the global fallback.
fn runtime_handle() -> tokio::runtime::Handle {
    tokio::runtime::Handle::try_current().unwrap_or_else(|_| FALLBACK_RUNTIME.handle().clone())
}

/// Concurrency Model:
/// - The store uses an r2d2 connection pool (concurrent reads)
/// - Shards are an immutable snapshot; a rebuild swaps in a new one
/// - Async searches run on spawn_blocking threads with a bounded timeout
pub struct SearchService {
    config: Config,
    store: Arc<RepetitionStore>,
    shards: RwLock<Arc<ShardSet>>,
    catalog: Arc<dyn DocumentCatalog>,
}

impl SearchService {
    /// Open the store and load every shard found in the artifact directory.
    pub fn open(config: Config) -> SearchResult<Self> {
        config.validate()?;
        init_rayon();
        let store = RepetitionStore::open(&config.database_path, config.pool_size)?;
        let shards = ShardSet::load_all(&config.artifact_dir)?;
        let catalog = JsonCatalog::new(&config.corpus_root, &config.reference_base_url);
        info!(shards = shards.len(), database = %config.database_path.display(), "search service opened");
        Ok(Self::from_parts(config, store, shards, Arc::new(catalog)))
    }

    pub fn from_parts(
        config: Config,
        store: RepetitionStore,
        shards: ShardSet,
        catalog: Arc<dyn DocumentCatalog>,
    ) -> Self {
        Self {
            config,
            store: Arc::new(store),
            shards: RwLock::new(Arc::new(shards)),
            catalog,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &RepetitionStore {
        &self.store
    }

    /// Current shard snapshot.
    pub fn shards(&self) -> Arc<ShardSet> {
        Arc::clone(&*self.shards.read())
    }

    /// Replace the shard snapshot. Searches already running keep the old one.
    pub fn swap_shards(&self, shards: ShardSet) -> Arc<ShardSet> {
        std::mem::replace(&mut *self.shards.write(), Arc::new(shards))
    }

    /// Reload shards from the artifact directory. Returns how many were loaded.
    pub fn reload_shards(&self) -> SearchResult<usize> {
        let shards = ShardSet::load_all(&self.config.artifact_dir)?;
        let loaded = shards.len();
        self.swap_shards(shards);
        info!(shards = loaded, "shards reloaded");
        Ok(loaded)
    }

    /// Index every shard of the configured corpus not yet indexed, then reload.
    pub fn build(&self, observer: &dyn ProgressObserver) -> SearchResult<BuildReport> {
        let report = ShardIndexer::new(&self.store, &self.config)
            .with_observer(observer)
            .run(&self.config.corpus_root)?;
        self.reload_shards()?;
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Blocking entry points
    // ─────────────────────────────────────────────────────────────────────────

    pub fn resolve_word(&self, word: &str, k: usize, threshold: f32) -> SearchResult<QueryResult> {
        let shards = self.shards();
        resolve(&self.store, &shards, self.config.encoding_levels, word, k, threshold, None)
    }

    pub fn combine_words(
        &self,
        words: &[String],
        mode: CombineMode,
        k: usize,
        threshold: f32,
    ) -> SearchResult<CombinedResult> {
        let shards = self.shards();
        combine_words(
            &self.store,
            &shards,
            self.catalog.as_ref(),
            self.config.encoding_levels,
            words,
            mode,
            k,
            threshold,
            None,
        )
    }

    pub fn word_timeline(
        &self,
        word: &str,
        docs_per_year: &DocsPerYear,
        k: usize,
        threshold: f32,
        normalize: bool,
    ) -> SearchResult<WordTimeline> {
        let result = self.resolve_word(word, k, threshold)?;
        Ok(WordTimeline {
            word: word.to_string(),
            normalized: normalize,
            series: year_series(&result.years, docs_per_year, normalize),
            result,
        })
    }

    pub fn words_timeline(
        &self,
        words: &[String],
        mode: CombineMode,
        docs_per_year: &DocsPerYear,
        k: usize,
        threshold: f32,
        normalize: bool,
    ) -> SearchResult<CombinedTimeline> {
        let combined = self.combine_words(words, mode, k, threshold)?;
        Ok(CombinedTimeline {
            words: words.to_vec(),
            mode,
            normalized: normalize,
            series: year_series(&combined.result.years, docs_per_year, normalize),
            combined,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Async entry points
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve `word` with the configured neighbors and threshold.
    ///
    /// Dropping the future cancels the search; it fails with
    /// [`SearchError::Timeout`] after the configured query timeout.
    pub async fn search_word(&self, word: String) -> SearchResult<QueryResult> {
        let (levels, k, threshold) = (self.config.encoding_levels, self.config.neighbors, self.config.threshold);
        self.run_blocking(move |store, shards, _catalog, guard| {
            resolve(store, shards, levels, &word, k, threshold, Some(guard))
        })
        .await
    }

    /// Resolve and combine `words` with the configured neighbors and threshold.
    pub async fn search_words(&self, words: Vec<String>, mode: CombineMode) -> SearchResult<CombinedResult> {
        let (levels, k, threshold) = (self.config.encoding_levels, self.config.neighbors, self.config.threshold);
        self.run_blocking(move |store, shards, catalog, guard| {
            combine_words(store, shards, catalog, levels, &words, mode, k, threshold, Some(guard))
        })
        .await
    }

    async fn run_blocking<T, F>(&self, work: F) -> SearchResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&RepetitionStore, &ShardSet, &dyn DocumentCatalog, &QueryGuard) -> SearchResult<T> + Send + 'static,
    {
        let token = CancellationToken::new();
        let _guard = DropGuard::new(token.clone());

        let runtime = runtime_handle();
        let query_guard = QueryGuard::new(token, runtime.clone());
        let store = Arc::clone(&self.store);
        let shards = self.shards();
        let catalog = Arc::clone(&self.catalog);
        let timeout = self.config.query_timeout();

        // We use runtime.spawn*() instead of tokio::task::spawn*() so callers
        // without a tokio context still work
        let blocking = runtime.spawn_blocking(move || work(&store, &shards, catalog.as_ref(), &query_guard));
        let timed = runtime.spawn(async move { tokio::time::timeout(timeout, blocking).await });

        match timed.await {
            Ok(Ok(Ok(result))) => result,
            Ok(Err(_elapsed)) => Err(SearchError::Timeout(timeout)),
            // JoinError means the task panicked or was aborted
            Ok(Ok(Err(_join_error))) | Err(_join_error) => Err(SearchError::Cancelled),
        }
    }
}

fn resolve(
    store: &RepetitionStore,
    shards: &ShardSet,
    levels: usize,
    word: &str,
    k: usize,
    threshold: f32,
    guard: Option<&QueryGuard>,
) -> SearchResult<QueryResult> {
    let resolver = MatchResolver::new(store, shards, levels);
    match guard {
        Some(guard) => resolver.resolve_interruptible(word, k, threshold, guard),
        None => resolver.resolve(word, k, threshold),
    }
}

#[allow(clippy::too_many_arguments)]
fn combine_words(
    store: &RepetitionStore,
    shards: &ShardSet,
    catalog: &dyn DocumentCatalog,
    levels: usize,
    words: &[String],
    mode: CombineMode,
    k: usize,
    threshold: f32,
    guard: Option<&QueryGuard>,
) -> SearchResult<CombinedResult> {
    if words.is_empty() {
        return Err(SearchError::InvalidInput("no words to combine".to_string()));
    }
    let terms = words
        .iter()
        .map(|word| resolve(store, shards, levels, word, k, threshold, guard))
        .collect::<SearchResult<Vec<_>>>()?;
    QueryCombiner::new(store, catalog).run(terms, mode, guard)
}
