//! SQLite aggregation store for word repetitions
//!
//! One table of raw repetition rows, aggregated with `SUM` at query time, plus a
//! table of shards whose rows are fully committed.
//! Uses r2d2 connection pooling to allow concurrent reads without mutex blocking.

use crate::location::LocationKey;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("query interrupted")]
    Interrupted,
}

pub type StoreResult<T> = Result<T, StoreError>;

const UNIQUE_INDEX_NAME: &str = "words_repetitions_index";
const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

/// Occurrences of one word in one region, as produced by the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepetitionRecord {
    pub word: String,
    pub document: String,
    pub year: i32,
    pub page: String,
    pub region: String,
    pub count: u64,
}

/// Counts summed per `(document, page, region)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepetitionRow {
    pub document: String,
    pub page: String,
    pub region: String,
    pub year: i32,
    pub total: u64,
}

impl RepetitionRow {
    pub fn location(&self) -> LocationKey {
        LocationKey::new(&self.document, &self.page, &self.region)
    }

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            document: row.get(0)?,
            page: row.get(1)?,
            region: row.get(2)?,
            year: row.get(3)?,
            total: non_negative(4, row.get(4)?)?,
        })
    }
}

/// Counts summed per document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentTotal {
    pub document: String,
    pub year: i32,
    pub total: u64,
}

/// Counts are never negative; a negative sum means corrupt rows.
fn non_negative(column: usize, total: i64) -> rusqlite::Result<u64> {
    u64::try_from(total).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(column, total))
}

fn count_param(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

/// Cancellation for a running lookup.
///
/// While a guarded statement runs, a watcher task on `runtime` waits for the token
/// and interrupts the connection at the SQLite C level.
#[derive(Clone)]
pub struct QueryGuard {
    token: CancellationToken,
    runtime: tokio::runtime::Handle,
}

impl QueryGuard {
    pub fn new(token: CancellationToken, runtime: tokio::runtime::Handle) -> Self {
        Self { token, runtime }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn watch(&self, conn: &Connection) -> AbortOnDropHandle<()> {
        let interrupt_handle = conn.get_interrupt_handle();
        let token = self.token.clone();
        AbortOnDropHandle::new(self.runtime.spawn(async move {
            token.cancelled().await;
            interrupt_handle.interrupt();
        }))
    }
}

fn is_interrupted(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ffi::ErrorCode::OperationInterrupted
    )
}

/// Thread-safe store wrapper using connection pooling
///
/// WAL mode enables readers to proceed without blocking each other.
pub struct RepetitionStore {
    pool: Pool<SqliteConnectionManager>,
}

impl RepetitionStore {
    /// Open or create a store at the given path with connection pooling
    pub fn open<P: AsRef<Path>>(path: P, pool_size: u32) -> StoreResult<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA temp_store=MEMORY;
                PRAGMA mmap_size=67108864;
                PRAGMA cache_size=-32000;
            ",
            )?;
            // Shards commit their rows concurrently during the build
            conn.busy_timeout(BUSY_TIMEOUT)?;
            Ok(())
        });

        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;

        let store = Self { pool };
        store.setup_schema()?;
        Ok(store)
    }

    /// Open an in-memory store (for tests and benchmarks)
    pub fn open_in_memory() -> StoreResult<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA temp_store=MEMORY;")?;
            Ok(())
        });

        // In-memory needs a single connection that is never recycled to keep its state
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;

        let store = Self { pool };
        store.setup_schema()?;
        Ok(store)
    }

    /// Get a connection from the pool
    fn get_conn(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn setup_schema(&self) -> StoreResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS words_repetitions (
                word TEXT,
                file TEXT,
                file_year INTEGER,
                page TEXT,
                bbox TEXT,
                n_reps INTEGER
            );

            CREATE TABLE IF NOT EXISTS folders (
                folder_name TEXT
            );
        "#,
        )?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Build phase
    // ─────────────────────────────────────────────────────────────────────────

    /// Append one raw row. Duplicate keys are allowed and summed by the lookups.
    pub fn insert(&self, record: &RepetitionRecord) -> StoreResult<()> {
        let conn = self.get_conn()?;
        Self::insert_row(&conn, record)?;
        Ok(())
    }

    fn insert_row(conn: &Connection, record: &RepetitionRecord) -> rusqlite::Result<()> {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO words_repetitions (word, file, file_year, page, bbox, n_reps) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        stmt.execute(params![
            record.word,
            record.document,
            record.year,
            record.page,
            record.region,
            count_param(record.count),
        ])?;
        Ok(())
    }

    /// Insert every row of a shard and mark the shard indexed in one transaction.
    ///
    /// Either all rows and the mark are committed, or nothing is.
    pub fn insert_shard(&self, shard: &str, records: &[RepetitionRecord]) -> StoreResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        for record in records {
            Self::insert_row(&tx, record)?;
        }
        Self::mark_row(&tx, shard)?;
        tx.commit()?;
        debug!(shard, rows = records.len(), "shard rows committed");
        Ok(records.len())
    }

    pub fn mark_shard_indexed(&self, shard: &str) -> StoreResult<()> {
        let conn = self.get_conn()?;
        Self::mark_row(&conn, shard)?;
        Ok(())
    }

    fn mark_row(conn: &Connection, shard: &str) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO folders (folder_name) SELECT ?1 WHERE NOT EXISTS (SELECT 1 FROM folders WHERE folder_name = ?1)",
            params![shard],
        )?;
        Ok(())
    }

    pub fn is_shard_indexed(&self, shard: &str) -> StoreResult<bool> {
        let conn = self.get_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM folders WHERE folder_name = ?1 LIMIT 1",
                params![shard],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn indexed_shards(&self) -> StoreResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT folder_name FROM folders ORDER BY folder_name")?;
        let shards = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(shards)
    }

    pub fn has_uniqueness_index(&self) -> StoreResult<bool> {
        let conn = self.get_conn()?;
        Self::index_exists(&conn)
    }

    fn index_exists(conn: &Connection) -> StoreResult<bool> {
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'words_repetitions' AND name = ?1",
                params![UNIQUE_INDEX_NAME],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Create the unique `(word, file, page, bbox)` index once bulk loading is done.
    ///
    /// Rows sharing a key are first merged into one row carrying the summed count,
    /// so lookups report the same totals before and after. Returns `false` when the
    /// index already existed.
    pub fn create_uniqueness_index(&self) -> StoreResult<bool> {
        let conn = self.get_conn()?;
        if Self::index_exists(&conn)? {
            info!("uniqueness index already exists");
            return Ok(false);
        }

        let started = std::time::Instant::now();
        let tx = conn.unchecked_transaction()?;
        let has_duplicates: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM words_repetitions GROUP BY word, file, page, bbox HAVING COUNT(*) > 1)",
            [],
            |row| row.get(0),
        )?;
        if has_duplicates {
            debug!("merging duplicate repetition rows");
            tx.execute_batch(
                r#"
                DROP TABLE IF EXISTS temp.compacted_repetitions;
                CREATE TEMP TABLE compacted_repetitions AS
                    SELECT word, file, MAX(file_year) AS file_year, page, bbox, SUM(n_reps) AS n_reps
                    FROM words_repetitions
                    GROUP BY word, file, page, bbox;
                DELETE FROM words_repetitions;
                INSERT INTO words_repetitions (word, file, file_year, page, bbox, n_reps)
                    SELECT word, file, file_year, page, bbox, n_reps FROM temp.compacted_repetitions;
                DROP TABLE temp.compacted_repetitions;
            "#,
            )?;
        }
        tx.execute_batch(&format!(
            "CREATE UNIQUE INDEX {UNIQUE_INDEX_NAME} ON words_repetitions (word, file, page, bbox)"
        ))?;
        tx.commit()?;

        info!(elapsed_ms = started.elapsed().as_millis() as u64, "uniqueness index created");
        Ok(true)
    }

    pub fn count_rows(&self) -> StoreResult<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM words_repetitions", [], |row| row.get(0))?;
        Ok(non_negative(0, count)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────

    /// Run `query` on `conn`, interrupting it when the guard's token is cancelled.
    fn run_query<T>(
        conn: &Connection,
        guard: Option<&QueryGuard>,
        query: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> StoreResult<T> {
        if guard.is_some_and(QueryGuard::is_cancelled) {
            return Err(StoreError::Interrupted);
        }
        let _watcher = guard.map(|g| g.watch(conn));
        match query(conn) {
            Ok(value) => Ok(value),
            Err(e) if is_interrupted(&e) => Err(StoreError::Interrupted),
            Err(e) => Err(e.into()),
        }
    }

    /// Locations of `word`, summed per `(document, page, region)`, largest first.
    pub fn lookup_by_word(&self, word: &str) -> StoreResult<Vec<RepetitionRow>> {
        self.word_rows(word, None)
    }

    pub fn lookup_by_word_interruptible(&self, word: &str, guard: &QueryGuard) -> StoreResult<Vec<RepetitionRow>> {
        self.word_rows(word, Some(guard))
    }

    fn word_rows(&self, word: &str, guard: Option<&QueryGuard>) -> StoreResult<Vec<RepetitionRow>> {
        let conn = self.get_conn()?;
        Self::run_query(&conn, guard, |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT file, page, bbox, MAX(file_year), SUM(n_reps) AS total
                 FROM words_repetitions
                 WHERE word = ?1
                 GROUP BY file, page, bbox
                 ORDER BY total DESC, file, page, bbox",
            )?;
            let rows = stmt
                .query_map(params![word], RepetitionRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Totals per document for the given documents, counting only `words`.
    pub fn lookup_by_documents(&self, documents: &[String], words: &[String]) -> StoreResult<Vec<DocumentTotal>> {
        self.document_totals(documents, words, None)
    }

    pub fn lookup_by_documents_interruptible(
        &self,
        documents: &[String],
        words: &[String],
        guard: &QueryGuard,
    ) -> StoreResult<Vec<DocumentTotal>> {
        self.document_totals(documents, words, Some(guard))
    }

    fn document_totals(
        &self,
        documents: &[String],
        words: &[String],
        guard: Option<&QueryGuard>,
    ) -> StoreResult<Vec<DocumentTotal>> {
        if documents.is_empty() || words.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        Self::run_query(&conn, guard, |conn| {
            Self::load_query_words(conn, words)?;
            {
                let tx = conn.unchecked_transaction()?;
                tx.execute_batch(
                    "DROP TABLE IF EXISTS temp.query_documents;
                     CREATE TEMP TABLE query_documents (file TEXT PRIMARY KEY);",
                )?;
                {
                    let mut insert = tx.prepare("INSERT OR IGNORE INTO temp.query_documents (file) VALUES (?1)")?;
                    for document in documents {
                        insert.execute(params![document])?;
                    }
                }
                tx.commit()?;
            }

            let mut stmt = conn.prepare(
                "SELECT wr.file, MAX(wr.file_year), SUM(wr.n_reps) AS total
                 FROM words_repetitions wr
                 INNER JOIN temp.query_documents qd ON wr.file = qd.file
                 WHERE wr.word IN (SELECT word FROM temp.query_words)
                 GROUP BY wr.file
                 ORDER BY total DESC, wr.file",
            )?;
            let totals = stmt
                .query_map([], |row| {
                    Ok(DocumentTotal {
                        document: row.get(0)?,
                        year: row.get(1)?,
                        total: non_negative(2, row.get(2)?)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(totals)
        })
    }

    /// Totals per exact location for the given locations, counting only `words`.
    pub fn lookup_by_locations(&self, locations: &[LocationKey], words: &[String]) -> StoreResult<Vec<RepetitionRow>> {
        self.location_rows(locations, words, None)
    }

    pub fn lookup_by_locations_interruptible(
        &self,
        locations: &[LocationKey],
        words: &[String],
        guard: &QueryGuard,
    ) -> StoreResult<Vec<RepetitionRow>> {
        self.location_rows(locations, words, Some(guard))
    }

    fn location_rows(
        &self,
        locations: &[LocationKey],
        words: &[String],
        guard: Option<&QueryGuard>,
    ) -> StoreResult<Vec<RepetitionRow>> {
        if locations.is_empty() || words.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        Self::run_query(&conn, guard, |conn| {
            Self::load_query_words(conn, words)?;
            {
                let tx = conn.unchecked_transaction()?;
                tx.execute_batch(
                    "DROP TABLE IF EXISTS temp.query_locations;
                     CREATE TEMP TABLE query_locations (
                         file TEXT, page TEXT, bbox TEXT,
                         PRIMARY KEY (file, page, bbox)
                     );",
                )?;
                {
                    let mut insert = tx.prepare(
                        "INSERT OR IGNORE INTO temp.query_locations (file, page, bbox) VALUES (?1, ?2, ?3)",
                    )?;
                    for key in locations {
                        insert.execute(params![key.document, key.page, key.region])?;
                    }
                }
                tx.commit()?;
            }

            let mut stmt = conn.prepare(
                "SELECT wr.file, wr.page, wr.bbox, MAX(wr.file_year), SUM(wr.n_reps) AS total
                 FROM words_repetitions wr
                 INNER JOIN temp.query_locations ql
                     ON wr.file = ql.file AND wr.page = ql.page AND wr.bbox = ql.bbox
                 WHERE wr.word IN (SELECT word FROM temp.query_words)
                 GROUP BY wr.file, wr.page, wr.bbox
                 ORDER BY total DESC, wr.file, wr.page, wr.bbox",
            )?;
            let rows = stmt
                .query_map([], RepetitionRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn load_query_words(conn: &Connection, words: &[String]) -> rusqlite::Result<()> {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(
            "DROP TABLE IF EXISTS temp.query_words;
             CREATE TEMP TABLE query_words (word TEXT PRIMARY KEY);",
        )?;
        {
            let mut insert = tx.prepare("INSERT OR IGNORE INTO temp.query_words (word) VALUES (?1)")?;
            for word in words {
                insert.execute(params![word])?;
            }
        }
        tx.commit()
    }
}
