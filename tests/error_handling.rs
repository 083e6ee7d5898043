//! Error taxonomy behavior visible from outside the crate.

use async_trait::async_trait;
use contentcache::metadata::sqlite::SqliteMetadataStore;
use contentcache::{Cache, CacheConfig, CacheError, ContentExtractor};
use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tempfile::tempdir;

struct FailingExtractor;

#[async_trait]
impl ContentExtractor for FailingExtractor {
    async fn extract(&self, _path: &Path) -> contentcache::Result<String> {
        Err(CacheError::processing("unsupported format"))
    }
}

struct NeverCalledExtractor {
    calls: AtomicUsize,
}

#[async_trait]
impl ContentExtractor for NeverCalledExtractor {
    async fn extract(&self, _path: &Path) -> contentcache::Result<String> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(String::new())
    }
}

#[tokio::test]
async fn extractor_failure_propagates_as_processing_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.txt");
    tokio::fs::write(&path, b"data").await.unwrap();

    let config = CacheConfig {
        cache_dir: dir.path().to_path_buf(),
        ..CacheConfig::default()
    };
    let store = Arc::new(SqliteMetadataStore::new(dir.path().join("metadata.sqlite3"), 2).unwrap());
    let cache = Cache::new(config, store).unwrap();
    cache.initialize().await.unwrap();

    let result = cache.get_content(&path, &FailingExtractor).await;
    assert!(matches!(result, Err(CacheError::Processing { .. })));
}

#[tokio::test]
async fn missing_source_file_is_not_found_without_invoking_extractor() {
    let dir = tempdir().unwrap();
    let config = CacheConfig {
        cache_dir: dir.path().to_path_buf(),
        ..CacheConfig::default()
    };
    let store = Arc::new(SqliteMetadataStore::new(dir.path().join("metadata.sqlite3"), 2).unwrap());
    let cache = Cache::new(config, store).unwrap();
    cache.initialize().await.unwrap();

    let extractor = NeverCalledExtractor {
        calls: AtomicUsize::new(0),
    };
    let result = cache.get_content(Path::new("/definitely/not/there.txt"), &extractor).await;
    assert!(matches!(result, Err(CacheError::NotFound { .. })));
}

#[tokio::test]
async fn invalid_configuration_is_rejected_at_construction() {
    let dir = tempdir().unwrap();
    let config = CacheConfig {
        cache_dir: dir.path().to_path_buf(),
        compression_level: 99,
        ..CacheConfig::default()
    };
    let store = Arc::new(SqliteMetadataStore::new(dir.path().join("metadata.sqlite3"), 2).unwrap());
    let result = Cache::new(config, store);
    assert!(matches!(result, Err(CacheError::Configuration { .. })));
}
