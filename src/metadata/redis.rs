//! Remote metadata backend on top of `redis`, for deployments that want a
//! shared cache across multiple processes or hosts.
//!
//! Each entry is a hash at `<prefix>:entry:<path>`, indexed into a per-hash
//! set at `<prefix>:byhash:<content_hash>` so `get_by_hash` doesn't require a
//! full scan, and a `<prefix>:hashcounts` hash tracking how many paths
//! currently reference each content hash. Aggregate counters live in
//! `<prefix>:stats`, mutated via `HINCRBY` alongside every `add`/`remove` so
//! concurrent writers never lose an increment. `get_all` walks entry keys
//! with `SCAN` in bounded batches rather than holding a single unbounded
//! command.

use super::{duplicate_groups_from_hash_counts, MetadataStore, Statistics};
use crate::error::{CacheError, Result};
use crate::types::CacheEntry;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const SCAN_BATCH: usize = 200;

/// Redis-backed [`MetadataStore`].
pub struct RedisMetadataStore {
    manager: Mutex<ConnectionManager>,
    prefix: String,
}

fn entry_key(prefix: &str, path: &Path) -> String {
    format!("{prefix}:entry:{}", path.to_string_lossy())
}

fn entry_pattern(prefix: &str) -> String {
    format!("{prefix}:entry:*")
}

fn hash_index_key(prefix: &str, hash: &str) -> String {
    format!("{prefix}:byhash:{hash}")
}

fn hash_counts_key(prefix: &str) -> String {
    format!("{prefix}:hashcounts")
}

fn stats_key(prefix: &str) -> String {
    format!("{prefix}:stats")
}

fn path_member(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn entry_to_fields(entry: &CacheEntry) -> Vec<(&'static str, String)> {
    vec![
        ("file_path", entry.file_path.to_string_lossy().to_string()),
        ("content_hash", entry.content_hash.clone()),
        ("modification_time", entry.modification_time.to_string()),
        ("file_size", entry.file_size.to_string()),
        ("content", entry.content.clone().unwrap_or_default()),
        (
            "content_blob_path",
            entry
                .content_blob_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
        ),
        ("extraction_timestamp", entry.extraction_timestamp.to_string()),
        ("access_count", entry.access_count.to_string()),
        ("last_accessed", entry.last_accessed.to_string()),
    ]
}

fn fields_to_entry(fields: HashMap<String, String>) -> Option<CacheEntry> {
    let get = |k: &str| fields.get(k).cloned();
    Some(CacheEntry {
        file_path: PathBuf::from(get("file_path")?),
        content_hash: get("content_hash")?,
        modification_time: get("modification_time")?.parse().ok()?,
        file_size: get("file_size")?.parse().ok()?,
        content: get("content").filter(|s| !s.is_empty()),
        content_blob_path: get("content_blob_path").filter(|s| !s.is_empty()).map(PathBuf::from),
        extraction_timestamp: get("extraction_timestamp")?.parse().ok()?,
        access_count: get("access_count")?.parse().ok()?,
        last_accessed: get("last_accessed")?.parse().ok()?,
    })
}

impl RedisMetadataStore {
    pub async fn new(redis_url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::configuration_with_source("invalid redis URL", e))?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            manager: Mutex::new(manager),
            prefix: prefix.into(),
        })
    }

    async fn increment_hash_count(&self, conn: &mut ConnectionManager, hash: &str) -> Result<()> {
        let _: i64 = conn.hincr(hash_counts_key(&self.prefix), hash, 1i64).await?;
        Ok(())
    }

    async fn decrement_hash_count(&self, conn: &mut ConnectionManager, hash: &str) -> Result<()> {
        let new_count: i64 = conn.hincr(hash_counts_key(&self.prefix), hash, -1i64).await?;
        if new_count <= 0 {
            let _: () = conn.hdel(hash_counts_key(&self.prefix), hash).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for RedisMetadataStore {
    async fn initialize(&self) -> Result<()> {
        // No schema to create; keys are created lazily on first write.
        Ok(())
    }

    async fn add(&self, entry: &CacheEntry) -> Result<()> {
        let mut conn = self.manager.lock().await;
        let key = entry_key(&self.prefix, &entry.file_path);
        let stats_key = stats_key(&self.prefix);

        let existing: HashMap<String, String> = conn.hgetall(&key).await?;
        let old_entry = if existing.is_empty() { None } else { fields_to_entry(existing) };

        // access_count is preserved/maximized across re-extraction, never reset.
        let mut final_entry = entry.clone();
        if let Some(old) = &old_entry {
            final_entry.access_count = final_entry.access_count.max(old.access_count);
        }

        match &old_entry {
            Some(old) if old.content_hash != final_entry.content_hash => {
                let _: () = conn
                    .srem(hash_index_key(&self.prefix, &old.content_hash), path_member(&entry.file_path))
                    .await?;
                self.decrement_hash_count(&mut conn, &old.content_hash).await?;
                let _: () = conn
                    .sadd(hash_index_key(&self.prefix, &final_entry.content_hash), path_member(&entry.file_path))
                    .await?;
                self.increment_hash_count(&mut conn, &final_entry.content_hash).await?;
            }
            None => {
                let _: () = conn
                    .sadd(hash_index_key(&self.prefix, &final_entry.content_hash), path_member(&entry.file_path))
                    .await?;
                self.increment_hash_count(&mut conn, &final_entry.content_hash).await?;
            }
            Some(_) => {}
        }

        let fields = entry_to_fields(&final_entry);
        let _: () = conn.hset_multiple(&key, &fields).await?;

        let size_delta = final_entry.file_size as i64 - old_entry.as_ref().map_or(0, |o| o.file_size as i64);
        let access_delta = final_entry.access_count as i64 - old_entry.as_ref().map_or(0, |o| o.access_count as i64);
        if old_entry.is_none() {
            let _: i64 = conn.hincr(&stats_key, "total_entries", 1i64).await?;
        }
        if size_delta != 0 {
            let _: i64 = conn.hincr(&stats_key, "total_size", size_delta).await?;
        }
        if access_delta != 0 {
            let _: i64 = conn.hincr(&stats_key, "total_access_count", access_delta).await?;
        }

        Ok(())
    }

    async fn get(&self, path: &Path) -> Result<Option<CacheEntry>> {
        let mut conn = self.manager.lock().await;
        let fields: HashMap<String, String> = conn.hgetall(entry_key(&self.prefix, path)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(fields_to_entry(fields))
    }

    async fn get_by_hash(&self, hash: &str) -> Result<Vec<CacheEntry>> {
        let mut conn = self.manager.lock().await;
        let paths: Vec<String> = conn.smembers(hash_index_key(&self.prefix, hash)).await?;
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let fields: HashMap<String, String> = conn.hgetall(entry_key(&self.prefix, Path::new(&path))).await?;
            if let Some(entry) = fields_to_entry(fields) {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| b.last_accessed.partial_cmp(&a.last_accessed).unwrap());
        Ok(entries)
    }

    /// Walk every `<prefix>:entry:*` key via non-blocking cursor-based `SCAN`
    /// in bounded batches, rather than a single unbounded command.
    async fn get_all(&self) -> Result<Vec<CacheEntry>> {
        let mut conn = self.manager.lock().await;
        let pattern = entry_pattern(&self.prefix);
        let mut cursor: u64 = 0;
        let mut entries = Vec::new();

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut *conn)
                .await?;

            for key in keys {
                let fields: HashMap<String, String> = conn.hgetall(&key).await?;
                if let Some(entry) = fields_to_entry(fields) {
                    entries.push(entry);
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(entries)
    }

    async fn remove(&self, path: &Path) -> Result<bool> {
        let mut conn = self.manager.lock().await;
        let key = entry_key(&self.prefix, path);
        let stats_key = stats_key(&self.prefix);

        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(false);
        }
        let Some(entry) = fields_to_entry(fields) else {
            return Ok(false);
        };

        let _: () = conn
            .srem(hash_index_key(&self.prefix, &entry.content_hash), path_member(path))
            .await?;
        self.decrement_hash_count(&mut conn, &entry.content_hash).await?;

        let removed: u64 = conn.del(&key).await?;
        if removed > 0 {
            let _: i64 = conn.hincr(&stats_key, "total_entries", -1i64).await?;
            let _: i64 = conn.hincr(&stats_key, "total_size", -(entry.file_size as i64)).await?;
            let _: i64 = conn.hincr(&stats_key, "total_access_count", -(entry.access_count as i64)).await?;
        }
        Ok(removed > 0)
    }

    async fn clear_older_than(&self, cutoff: f64) -> Result<u64> {
        let all = self.get_all().await?;
        let mut removed = 0u64;
        for entry in all {
            if entry.last_accessed < cutoff && self.remove(&entry.file_path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn statistics(&self) -> Result<Statistics> {
        let mut conn = self.manager.lock().await;

        let raw: HashMap<String, String> = conn.hgetall(stats_key(&self.prefix)).await?;
        let parse = |k: &str| raw.get(k).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0).max(0) as u64;
        let total_entries = parse("total_entries");
        let total_size = parse("total_size");
        let total_access_count = parse("total_access_count");

        let counts: HashMap<String, String> = conn.hgetall(hash_counts_key(&self.prefix)).await?;
        let unique_hashes = counts.len() as u64;
        let duplicate_groups =
            duplicate_groups_from_hash_counts(counts.values().filter_map(|v| v.parse::<u64>().ok()));

        Ok(Statistics {
            total_entries,
            total_size,
            unique_hashes,
            total_access_count,
            duplicate_groups,
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
