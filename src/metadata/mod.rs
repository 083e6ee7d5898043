//! Persistent metadata storage: the durable record of cache entries behind
//! the in-memory LRU, with interchangeable embedded and remote backends.

#[cfg(feature = "sqlite-backend")]
pub mod sqlite;

#[cfg(feature = "redis-backend")]
pub mod redis;

use crate::error::Result;
use crate::types::CacheEntry;
use async_trait::async_trait;
use std::path::Path;

/// Aggregate counters reported by [`MetadataStore::statistics`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    pub total_entries: u64,
    pub total_size: u64,
    pub unique_hashes: u64,
    pub total_access_count: u64,
    /// Number of content hashes shared by more than one stored path.
    pub duplicate_groups: u64,
}

/// Durable store of [`CacheEntry`] records, keyed by file path.
///
/// Implementations are free to choose their own storage engine; callers only
/// depend on this trait, never on a concrete backend type, so the orchestrator
/// can be built against either an embedded or a remote store interchangeably.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Prepare the backend for use: create tables/indexes, open connections.
    async fn initialize(&self) -> Result<()>;

    /// Insert or fully replace the entry for `entry.file_path`.
    async fn add(&self, entry: &CacheEntry) -> Result<()>;

    /// Look up the entry for an exact path.
    async fn get(&self, path: &Path) -> Result<Option<CacheEntry>>;

    /// Look up all entries sharing a content hash, newest access first.
    async fn get_by_hash(&self, hash: &str) -> Result<Vec<CacheEntry>>;

    /// Return every stored entry. Intended for maintenance and statistics, not
    /// the request hot path.
    async fn get_all(&self) -> Result<Vec<CacheEntry>>;

    /// Remove the entry for a path, if any. Returns whether one was removed.
    async fn remove(&self, path: &Path) -> Result<bool>;

    /// Remove every entry whose `last_accessed` is older than `cutoff`
    /// (seconds since epoch). Returns the number removed.
    async fn clear_older_than(&self, cutoff: f64) -> Result<u64>;

    /// Compute aggregate statistics over the current store contents.
    async fn statistics(&self) -> Result<Statistics>;

    /// Release any held resources (connections, handles).
    async fn close(&self) -> Result<()>;
}

pub(crate) fn duplicate_groups_from_hash_counts(counts: impl Iterator<Item = u64>) -> u64 {
    counts.filter(|&count| count > 1).count() as u64
}
