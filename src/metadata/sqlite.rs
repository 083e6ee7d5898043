//! Embedded metadata backend on top of `rusqlite`.
//!
//! Connections are pooled by hand: a `Vec<Connection>` behind a
//! `parking_lot::Mutex`, gated by a `Semaphore` sized to the configured pool
//! size, with every blocking `rusqlite` call run inside `spawn_blocking`.

use super::{duplicate_groups_from_hash_counts, MetadataStore, Statistics};
use crate::error::{CacheError, Result};
use crate::types::CacheEntry;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entries (
    file_path           TEXT PRIMARY KEY,
    content_hash         TEXT NOT NULL,
    modification_time    REAL NOT NULL,
    file_size            INTEGER NOT NULL,
    content              TEXT,
    content_blob_path    TEXT,
    extraction_timestamp  REAL NOT NULL,
    access_count         INTEGER NOT NULL,
    last_accessed        REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entries_content_hash ON entries(content_hash);
CREATE INDEX IF NOT EXISTS idx_entries_last_accessed ON entries(last_accessed);
";

struct Pool {
    connections: Mutex<Vec<Connection>>,
    semaphore: Semaphore,
}

impl Pool {
    fn new(db_path: &Path, size: usize) -> Result<Self> {
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open(db_path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            connections.push(conn);
        }
        Ok(Self {
            connections: Mutex::new(connections),
            semaphore: Semaphore::new(size),
        })
    }

    fn checkout(&self) -> Connection {
        self.connections
            .lock()
            .pop()
            .expect("permit implies a free connection")
    }

    fn checkin(&self, conn: Connection) {
        self.connections.lock().push(conn);
    }
}

/// SQLite-backed [`MetadataStore`].
pub struct SqliteMetadataStore {
    pool: Arc<Pool>,
}

impl SqliteMetadataStore {
    pub fn new(db_path: PathBuf, pool_size: usize) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            pool: Arc::new(Pool::new(&db_path, pool_size.max(1))?),
        })
    }

    async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        let _permit = pool
            .semaphore
            .acquire()
            .await
            .map_err(|_| CacheError::storage("connection pool semaphore closed"))?;

        tokio::task::spawn_blocking(move || {
            let conn = pool.checkout();
            let result = f(&conn);
            pool.checkin(conn);
            result
        })
        .await
        .map_err(|e| CacheError::storage_with_source("sqlite task panicked", e))?
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<CacheEntry> {
    let file_path: String = row.get(0)?;
    let content_blob_path: Option<String> = row.get(5)?;
    Ok(CacheEntry {
        file_path: PathBuf::from(file_path),
        content_hash: row.get(1)?,
        modification_time: row.get(2)?,
        file_size: row.get(3)?,
        content: row.get(4)?,
        content_blob_path: content_blob_path.map(PathBuf::from),
        extraction_timestamp: row.get(6)?,
        access_count: row.get(7)?,
        last_accessed: row.get(8)?,
    })
}

const SELECT_COLUMNS: &str = "file_path, content_hash, modification_time, file_size, content, \
    content_blob_path, extraction_timestamp, access_count, last_accessed";

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn initialize(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
    }

    async fn add(&self, entry: &CacheEntry) -> Result<()> {
        let entry = entry.clone();
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO entries (file_path, content_hash, modification_time, file_size, content, \
                 content_blob_path, extraction_timestamp, access_count, last_accessed) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(file_path) DO UPDATE SET \
                 content_hash = excluded.content_hash, \
                 modification_time = excluded.modification_time, \
                 file_size = excluded.file_size, \
                 content = excluded.content, \
                 content_blob_path = excluded.content_blob_path, \
                 extraction_timestamp = excluded.extraction_timestamp, \
                 access_count = MAX(entries.access_count, excluded.access_count), \
                 last_accessed = excluded.last_accessed",
                params![
                    entry.file_path.to_string_lossy(),
                    entry.content_hash,
                    entry.modification_time,
                    entry.file_size,
                    entry.content,
                    entry.content_blob_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                    entry.extraction_timestamp,
                    entry.access_count,
                    entry.last_accessed,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, path: &Path) -> Result<Option<CacheEntry>> {
        let path = path.to_path_buf();
        self.with_connection(move |conn| {
            let sql = format!("SELECT {SELECT_COLUMNS} FROM entries WHERE file_path = ?1");
            let entry = conn
                .query_row(&sql, params![path.to_string_lossy()], row_to_entry)
                .optional()?;
            Ok(entry)
        })
        .await
    }

    async fn get_by_hash(&self, hash: &str) -> Result<Vec<CacheEntry>> {
        let hash = hash.to_string();
        self.with_connection(move |conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM entries WHERE content_hash = ?1 ORDER BY last_accessed DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![hash], row_to_entry)?;
            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }
            Ok(entries)
        })
        .await
    }

    async fn get_all(&self) -> Result<Vec<CacheEntry>> {
        self.with_connection(move |conn| {
            let sql = format!("SELECT {SELECT_COLUMNS} FROM entries");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_entry)?;
            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }
            Ok(entries)
        })
        .await
    }

    async fn remove(&self, path: &Path) -> Result<bool> {
        let path = path.to_path_buf();
        self.with_connection(move |conn| {
            let changed = conn.execute(
                "DELETE FROM entries WHERE file_path = ?1",
                params![path.to_string_lossy()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn clear_older_than(&self, cutoff: f64) -> Result<u64> {
        self.with_connection(move |conn| {
            let changed = conn.execute(
                "DELETE FROM entries WHERE last_accessed < ?1",
                params![cutoff],
            )?;
            Ok(changed as u64)
        })
        .await
    }

    async fn statistics(&self) -> Result<Statistics> {
        self.with_connection(|conn| {
            let total_entries: u64 =
                conn.query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))?;
            let total_size: i64 =
                conn.query_row("SELECT COALESCE(SUM(file_size), 0) FROM entries", [], |r| r.get(0))?;
            let total_access_count: i64 = conn.query_row(
                "SELECT COALESCE(SUM(access_count), 0) FROM entries",
                [],
                |r| r.get(0),
            )?;
            let unique_hashes: u64 =
                conn.query_row("SELECT COUNT(DISTINCT content_hash) FROM entries", [], |r| r.get(0))?;

            let mut stmt = conn.prepare("SELECT COUNT(*) FROM entries GROUP BY content_hash")?;
            let counts: Vec<u64> = stmt
                .query_map([], |r| r.get::<_, i64>(0).map(|v| v as u64))?
                .collect::<rusqlite::Result<_>>()?;
            let duplicate_groups = duplicate_groups_from_hash_counts(counts.into_iter());

            Ok(Statistics {
                total_entries,
                total_size: total_size as u64,
                unique_hashes,
                total_access_count: total_access_count as u64,
                duplicate_groups,
            })
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
