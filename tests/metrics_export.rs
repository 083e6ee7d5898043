//! Prometheus text-format export from a live cache.

use async_trait::async_trait;
use contentcache::metadata::sqlite::SqliteMetadataStore;
use contentcache::{Cache, CacheConfig, ContentExtractor};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

struct EchoExtractor;

#[async_trait]
impl ContentExtractor for EchoExtractor {
    async fn extract(&self, path: &Path) -> contentcache::Result<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

#[tokio::test]
async fn metrics_snapshot_reflects_traffic() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.txt");
    tokio::fs::write(&path, b"hello").await.unwrap();

    let config = CacheConfig {
        cache_dir: dir.path().to_path_buf(),
        ..CacheConfig::default()
    };
    let store = Arc::new(SqliteMetadataStore::new(dir.path().join("metadata.sqlite3"), 2).unwrap());
    let cache = Cache::new(config, store).unwrap();
    cache.initialize().await.unwrap();

    cache.get_content(&path, &EchoExtractor).await.unwrap();
    cache.get_content(&path, &EchoExtractor).await.unwrap();

    let rendered = cache.get_metrics_prometheus().unwrap();
    assert!(rendered.contains("cache_requests_total 2"));
    assert!(rendered.contains("cache_hits_total 1"));
}
