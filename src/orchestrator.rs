//! The cache orchestrator: composes every tier into the public `get_content`
//! lookup cascade, plus batch operations, invalidation, and statistics.

use crate::blob_store::BlobStore;
use crate::bloom::NegativeExistenceFilter;
use crate::config::{CacheConfig, EXTERNALIZATION_THRESHOLD};
use crate::error::{CacheError, Result};
use crate::integrity::IntegrityChecker;
use crate::lock_registry::LockRegistry;
use crate::memory_lru::InMemoryLru;
use crate::metadata::{MetadataStore, Statistics as MetadataStatistics};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::path_validation::validate_path;
use crate::types::{CacheEntry, CachedContent, IntegrityStatus};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Produces extracted content for a source file. Implemented by callers; the
/// cache only ever invokes this on a miss or a failed freshness check.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<String>;
}

fn now_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Aggregate statistics combining persistent-store counts, live tier sizes,
/// and orchestrator-local request counters.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStatistics {
    pub total_entries: u64,
    pub total_size: u64,
    pub unique_hashes: u64,
    pub total_access_count: u64,
    pub duplicate_groups: u64,
    pub memory_entries: usize,
    pub memory_size_bytes: usize,
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub bloom_filter_hits: u64,
    pub errors_by_kind: std::collections::HashMap<String, u64>,
    pub avg_response_time_seconds: f64,
}

/// Ties together the in-memory LRU, persistent metadata store, blob store,
/// integrity checker, lock registry, negative-existence filter, and metrics
/// into the single entry point described by `get_content`.
pub struct Cache {
    config: CacheConfig,
    memory: InMemoryLru,
    metadata: Arc<dyn MetadataStore>,
    blobs: BlobStore,
    integrity: IntegrityChecker,
    locks: LockRegistry,
    negative_filter: NegativeExistenceFilter,
    metrics: Metrics,
}

impl Cache {
    pub fn new(config: CacheConfig, metadata: Arc<dyn MetadataStore>) -> Result<Self> {
        config.validate()?;
        let blobs = BlobStore::new(config.cache_dir.join("blobs"), config.compression_level);
        Ok(Self {
            memory: InMemoryLru::new(config.max_memory_size as usize),
            metadata,
            blobs,
            integrity: IntegrityChecker::new(config.verify_hash),
            locks: LockRegistry::new(),
            negative_filter: NegativeExistenceFilter::new(config.bloom_filter_size),
            metrics: Metrics::new()?,
            config,
        })
    }

    pub async fn initialize(&self) -> Result<()> {
        self.metadata.initialize().await
    }

    pub async fn close(&self) -> Result<()> {
        self.metadata.close().await
    }

    fn to_cached_content(&self, entry: &CacheEntry, content: String, from_cache: bool) -> CachedContent {
        CachedContent {
            content,
            from_cache,
            content_hash: entry.content_hash.clone(),
            extraction_timestamp: entry.extraction_timestamp,
            file_size: entry.file_size,
        }
    }

    async fn hydrate_content(&self, entry: &CacheEntry) -> Option<String> {
        if let Some(content) = &entry.content {
            return Some(content.clone());
        }
        if let Some(_blob_path) = &entry.content_blob_path {
            return self.blobs.retrieve(&entry.content_hash).await;
        }
        None
    }

    async fn extract_and_store(&self, path: &Path, extractor: &dyn ContentExtractor) -> Result<(CacheEntry, String)> {
        let metadata = tokio::fs::metadata(path).await?;
        let mtime = metadata
            .modified()
            .map_err(|e| CacheError::storage_with_source("failed to read mtime", e))?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_else(|_| now_seconds());
        let file_size = metadata.len();

        let content = extractor.extract(path).await?;
        let hash = self.integrity.compute_hash(path).await?;
        let now = now_seconds();

        let (inline_content, blob_path) = if content.len() > EXTERNALIZATION_THRESHOLD {
            let blob_path = self.blobs.store(&hash, &content).await?;
            (None, Some(blob_path))
        } else {
            (Some(content.clone()), None)
        };

        let entry = CacheEntry {
            file_path: path.to_path_buf(),
            content_hash: hash,
            modification_time: mtime,
            file_size,
            content: inline_content,
            content_blob_path: blob_path,
            extraction_timestamp: now,
            access_count: 0,
            last_accessed: now,
        };

        self.metadata.add(&entry).await?;
        if entry.content_blob_path.is_none() {
            self.memory.put(entry.clone());
        }

        Ok((entry, content))
    }

    /// The 7-step lookup cascade: validate path, stat to confirm existence
    /// (recording a filter hit or a fresh negative entry on absence),
    /// in-memory LRU, persistent store, integrity check at each hit,
    /// single-flight extraction on miss.
    pub async fn get_content(&self, path: &Path, extractor: &dyn ContentExtractor) -> Result<CachedContent> {
        let start = Instant::now();
        let result = self.get_content_inner(path, extractor).await;
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(content) => self.metrics.record_request(content.from_cache, elapsed),
            Err(e) => {
                self.metrics.record_request(false, elapsed);
                self.metrics.record_error(e);
            }
        }
        result
    }

    async fn get_content_inner(&self, path: &Path, extractor: &dyn ContentExtractor) -> Result<CachedContent> {
        let path = validate_path(path, &self.config.allowed_paths)?;

        if tokio::fs::metadata(&path).await.is_err() {
            if self.negative_filter.maybe_contains(&path) {
                self.metrics.record_bloom_filter_hit();
            } else {
                self.negative_filter.insert(&path);
            }
            return Err(CacheError::NotFound { path });
        }

        if let Some(entry) = self.memory.get(&path) {
            if let Some(content) = self.try_serve(&entry, true).await? {
                return Ok(content);
            }
        }

        if let Some(entry) = self.metadata.get(&path).await? {
            self.memory.put(entry.clone());
            if let Some(content) = self.try_serve(&entry, true).await? {
                return Ok(content);
            }
        }

        self.extract_fresh(&path, extractor).await
    }

    /// Validate a candidate entry's freshness and, if valid, hydrate and record
    /// the access. Returns `None` when the entry can't be served as-is and a
    /// fresh extraction is required.
    async fn try_serve(&self, entry: &CacheEntry, from_cache: bool) -> Result<Option<CachedContent>> {
        match self.integrity.check(entry).await {
            IntegrityStatus::Valid => {
                let Some(content) = self.hydrate_content(entry).await else {
                    return Ok(None);
                };
                self.touch(entry).await?;
                Ok(Some(self.to_cached_content(entry, content, from_cache)))
            }
            IntegrityStatus::FileMissing => Err(CacheError::NotFound {
                path: entry.file_path.clone(),
            }),
            IntegrityStatus::FileModified | IntegrityStatus::ContentChanged => Ok(None),
            IntegrityStatus::Corrupted => {
                warn!("treating corrupted entry for {:?} as a cache miss", entry.file_path);
                Ok(None)
            }
        }
    }

    async fn touch(&self, entry: &CacheEntry) -> Result<()> {
        let mut updated = entry.clone();
        updated.access_count += 1;
        updated.last_accessed = now_seconds();
        self.metadata.add(&updated).await?;
        self.memory.put(updated);
        Ok(())
    }

    /// Single-flight extraction: acquire the per-path lock, then re-check the
    /// cache before calling the extractor, so concurrent callers for the same
    /// path only extract once.
    async fn extract_fresh(&self, path: &Path, extractor: &dyn ContentExtractor) -> Result<CachedContent> {
        let _guard = self.locks.acquire(&path.to_path_buf()).await;

        if let Some(entry) = self.metadata.get(path).await? {
            if let Some(content) = self.try_serve(&entry, true).await? {
                return Ok(content);
            }
        }

        let (entry, content) = self.extract_and_store(path, extractor).await?;
        Ok(self.to_cached_content(&entry, content, false))
    }

    /// Run `get_content` over many paths concurrently, bounded by `max_concurrent`.
    /// Results are reassembled in input order regardless of completion order.
    ///
    /// Takes `self` behind an `Arc` so each spawned task can hold its own
    /// reference to the cache, mirroring the extractor's own batch helpers.
    pub async fn get_content_batch(
        self: &Arc<Self>,
        paths: &[PathBuf],
        extractor: Arc<dyn ContentExtractor>,
        max_concurrent: usize,
    ) -> Vec<(PathBuf, Result<CachedContent>)> {
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        for (index, path) in paths.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let cache = Arc::clone(self);
            let extractor = Arc::clone(&extractor);
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                let result = cache.get_content(&path, extractor.as_ref()).await;
                (index, path, result)
            });
        }

        let mut slots: Vec<Option<(PathBuf, Result<CachedContent>)>> = (0..paths.len()).map(|_| None).collect();
        while let Some(task_result) = tasks.join_next().await {
            if let Ok((index, path, result)) = task_result {
                slots[index] = Some((path, result));
            }
        }
        slots.into_iter().flatten().collect()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Remove a path from every tier: in-memory LRU, its blob if externalized,
    /// then the persistent store row. Missing at any layer is not an error.
    pub async fn invalidate(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path, &self.config.allowed_paths)?;
        self.memory.remove(&path);

        if let Some(entry) = self.metadata.get(&path).await? {
            if entry.content_blob_path.is_some() {
                self.blobs.delete(&entry.content_hash);
            }
        }

        self.metadata.remove(&path).await
    }

    /// Run `invalidate` over many paths concurrently, in input order, errors
    /// per path surfacing in that path's own result slot rather than failing
    /// the whole batch.
    pub async fn invalidate_batch(self: &Arc<Self>, paths: &[PathBuf], max_concurrent: usize) -> Vec<(PathBuf, Result<bool>)> {
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        for (index, path) in paths.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let cache = Arc::clone(self);
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                let result = cache.invalidate(&path).await;
                (index, path, result)
            });
        }

        let mut slots: Vec<Option<(PathBuf, Result<bool>)>> = (0..paths.len()).map(|_| None).collect();
        while let Some(task_result) = tasks.join_next().await {
            if let Ok((index, path, result)) = task_result {
                slots[index] = Some((path, result));
            }
        }
        slots.into_iter().flatten().collect()
    }

    /// Remove every persistent entry whose extraction predates `max_age_seconds`
    /// ago and drop the in-memory LRU wholesale (cheaper than selective pruning
    /// since the LRU will repopulate from live traffic).
    pub async fn clear_old_entries(&self, max_age_seconds: f64) -> Result<u64> {
        let cutoff = now_seconds() - max_age_seconds;
        let removed = self.metadata.clear_older_than(cutoff).await?;
        self.memory.clear();
        debug!(removed, cutoff, "cleared aged entries");
        Ok(removed)
    }

    pub async fn get_statistics(&self) -> Result<CacheStatistics> {
        let MetadataStatistics {
            total_entries,
            total_size,
            unique_hashes,
            total_access_count,
            duplicate_groups,
        } = self.metadata.statistics().await?;

        self.metrics.set_memory_usage_bytes(self.memory.current_size_bytes() as u64);
        self.metrics.set_disk_usage_bytes(total_size);

        let MetricsSnapshot {
            requests,
            hits,
            misses,
            bloom_filter_hits,
            errors_by_kind,
            avg_response_time_seconds,
        } = self.metrics.snapshot();

        Ok(CacheStatistics {
            total_entries,
            total_size,
            unique_hashes,
            total_access_count,
            duplicate_groups,
            memory_entries: self.memory.len(),
            memory_size_bytes: self.memory.current_size_bytes(),
            requests,
            hits,
            misses,
            bloom_filter_hits,
            errors_by_kind,
            avg_response_time_seconds,
        })
    }

    pub fn get_metrics_prometheus(&self) -> Result<String> {
        self.metrics.render_prometheus()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::sqlite::SqliteMetadataStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;

    struct CountingExtractor {
        calls: AtomicUsize,
        content: String,
    }

    #[async_trait]
    impl ContentExtractor for CountingExtractor {
        async fn extract(&self, _path: &Path) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.content.clone())
        }
    }

    async fn write_file(path: &Path, contents: &[u8]) {
        let mut f = tokio::fs::File::create(path).await.unwrap();
        f.write_all(contents).await.unwrap();
        f.flush().await.unwrap();
    }

    async fn build_cache(dir: &Path) -> Cache {
        let mut config = CacheConfig {
            cache_dir: dir.to_path_buf(),
            ..CacheConfig::default()
        };
        config.max_memory_size = 16 * 1024 * 1024;
        let store = Arc::new(SqliteMetadataStore::new(dir.join("meta.db"), 2).unwrap());
        let cache = Cache::new(config, store).unwrap();
        cache.initialize().await.unwrap();
        cache
    }

    #[tokio::test]
    async fn first_call_misses_second_call_hits() {
        let dir = tempdir().unwrap();
        let cache = build_cache(dir.path()).await;
        let file = dir.path().join("a.txt");
        write_file(&file, b"hello world").await;

        let extractor = CountingExtractor {
            calls: AtomicUsize::new(0),
            content: "extracted text".to_string(),
        };

        let first = cache.get_content(&file, &extractor).await.unwrap();
        assert!(!first.from_cache);

        let second = cache.get_content(&file, &extractor).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.content, "extracted text");
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_re_extraction() {
        let dir = tempdir().unwrap();
        let cache = build_cache(dir.path()).await;
        let file = dir.path().join("a.txt");
        write_file(&file, b"hello world").await;

        let extractor = CountingExtractor {
            calls: AtomicUsize::new(0),
            content: "text".to_string(),
        };

        cache.get_content(&file, &extractor).await.unwrap();
        assert!(cache.invalidate(&file).await.unwrap());

        let after = cache.get_content(&file, &extractor).await.unwrap();
        assert!(!after.from_cache);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_file_surfaces_not_found() {
        let dir = tempdir().unwrap();
        let cache = build_cache(dir.path()).await;
        let extractor = CountingExtractor {
            calls: AtomicUsize::new(0),
            content: "x".to_string(),
        };

        let result = cache.get_content(Path::new("/no/such/file"), &extractor).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn repeated_lookup_of_missing_file_counts_as_a_filter_hit() {
        let dir = tempdir().unwrap();
        let cache = build_cache(dir.path()).await;
        let missing = dir.path().join("never-written.txt");
        let extractor = CountingExtractor {
            calls: AtomicUsize::new(0),
            content: "x".to_string(),
        };

        assert!(cache.get_content(&missing, &extractor).await.is_err());
        assert!(cache.get_content(&missing, &extractor).await.is_err());

        let stats = cache.get_statistics().await.unwrap();
        assert_eq!(stats.bloom_filter_hits, 1);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn path_outside_allowlist_does_not_touch_the_filter() {
        let dir = tempdir().unwrap();
        let allowed = dir.path().join("allowed");
        std::fs::create_dir_all(&allowed).unwrap();
        let mut config = CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            allowed_paths: vec![allowed],
            ..CacheConfig::default()
        };
        config.max_memory_size = 16 * 1024 * 1024;
        let store = Arc::new(SqliteMetadataStore::new(dir.path().join("meta.db"), 2).unwrap());
        let cache = Cache::new(config, store).unwrap();
        cache.initialize().await.unwrap();

        let outside = dir.path().join("outside.txt");
        let extractor = CountingExtractor {
            calls: AtomicUsize::new(0),
            content: "x".to_string(),
        };

        let result = cache.get_content(&outside, &extractor).await;
        assert!(matches!(result, Err(CacheError::Permission { .. })));

        let stats = cache.get_statistics().await.unwrap();
        assert_eq!(stats.bloom_filter_hits, 0);
    }

    #[tokio::test]
    async fn concurrent_requests_for_same_path_extract_once() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(build_cache(dir.path()).await);
        let file = dir.path().join("a.txt");
        write_file(&file, b"hello world").await;

        let extractor = Arc::new(CountingExtractor {
            calls: AtomicUsize::new(0),
            content: "text".to_string(),
        });

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let extractor = Arc::clone(&extractor);
            let file = file.clone();
            tasks.push(tokio::spawn(async move {
                cache.get_content(&file, extractor.as_ref()).await.unwrap()
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn statistics_reflect_stored_entries() {
        let dir = tempdir().unwrap();
        let cache = build_cache(dir.path()).await;
        let file = dir.path().join("a.txt");
        write_file(&file, b"hello world").await;

        let extractor = CountingExtractor {
            calls: AtomicUsize::new(0),
            content: "text".to_string(),
        };
        cache.get_content(&file, &extractor).await.unwrap();

        let stats = cache.get_statistics().await.unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.memory_entries, 1);
    }

    #[tokio::test]
    async fn invalidating_one_of_two_duplicate_paths_keeps_the_other() {
        let dir = tempdir().unwrap();
        let cache = build_cache(dir.path()).await;
        let file_a = dir.path().join("a.txt");
        let file_b = dir.path().join("b.txt");
        write_file(&file_a, b"shared content").await;
        write_file(&file_b, b"shared content").await;

        let extractor = CountingExtractor {
            calls: AtomicUsize::new(0),
            content: "shared content".to_string(),
        };
        cache.get_content(&file_a, &extractor).await.unwrap();
        cache.get_content(&file_b, &extractor).await.unwrap();

        cache.invalidate(&file_a).await.unwrap();

        let stats = cache.get_statistics().await.unwrap();
        assert_eq!(stats.total_entries, 1);

        let second = cache.get_content(&file_b, &extractor).await.unwrap();
        assert!(second.from_cache);
    }

    #[tokio::test]
    async fn get_content_batch_covers_every_path() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(build_cache(dir.path()).await);
        let file_a = dir.path().join("a.txt");
        let file_b = dir.path().join("b.txt");
        write_file(&file_a, b"content a").await;
        write_file(&file_b, b"content b").await;

        let extractor: Arc<dyn ContentExtractor> = Arc::new(CountingExtractor {
            calls: AtomicUsize::new(0),
            content: "text".to_string(),
        });

        let results = cache
            .get_content_batch(&[file_a.clone(), file_b.clone()], extractor, 4)
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }

    #[tokio::test]
    async fn get_content_batch_preserves_input_order() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(build_cache(dir.path()).await);
        let mut paths = Vec::new();
        for i in 0..12 {
            let path = dir.path().join(format!("{i}.txt"));
            write_file(&path, format!("content {i}").as_bytes()).await;
            paths.push(path);
        }

        let extractor: Arc<dyn ContentExtractor> = Arc::new(CountingExtractor {
            calls: AtomicUsize::new(0),
            content: "text".to_string(),
        });

        let results = cache.get_content_batch(&paths, extractor, 8).await;
        assert_eq!(results.len(), paths.len());
        for (expected, (actual, _)) in paths.iter().zip(results.iter()) {
            assert_eq!(expected, actual);
        }
    }

    #[tokio::test]
    async fn clear_old_entries_removes_everything_before_cutoff() {
        let dir = tempdir().unwrap();
        let cache = build_cache(dir.path()).await;
        let file = dir.path().join("a.txt");
        write_file(&file, b"content").await;

        let extractor = CountingExtractor {
            calls: AtomicUsize::new(0),
            content: "text".to_string(),
        };
        cache.get_content(&file, &extractor).await.unwrap();

        let removed = cache.clear_old_entries(-1.0).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.get_statistics().await.unwrap().total_entries, 0);
    }
}
