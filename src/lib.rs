//! contentcache - tiered content-extraction cache
//!
//! An embeddable cache for expensive file-content extraction: a size-bounded
//! in-memory LRU sits in front of a durable metadata store (embedded SQLite
//! or remote Redis), with large extracted content externalized into a
//! content-addressed, compressed blob store. Freshness is judged by file
//! modification time first and, when enabled, by a re-hash of the file's
//! bytes, so a file copied back to an earlier state is recognized rather
//! than treated as a miss.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use contentcache::{Cache, CacheConfig, ContentExtractor};
//! use contentcache::metadata::sqlite::SqliteMetadataStore;
//! use async_trait::async_trait;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! struct PlainTextExtractor;
//!
//! #[async_trait]
//! impl ContentExtractor for PlainTextExtractor {
//!     async fn extract(&self, path: &Path) -> contentcache::Result<String> {
//!         Ok(tokio::fs::read_to_string(path).await?)
//!     }
//! }
//!
//! # async fn run() -> contentcache::Result<()> {
//! let config = CacheConfig::default();
//! let store = Arc::new(SqliteMetadataStore::new(config.cache_dir.join("metadata.sqlite3"), config.db_pool_size)?);
//! let cache = Cache::new(config, store)?;
//! cache.initialize().await?;
//!
//! let result = cache.get_content(Path::new("README.md"), &PlainTextExtractor).await?;
//! println!("from_cache={} bytes={}", result.from_cache, result.content.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`orchestrator`]: the `Cache` type and its lookup cascade, batch
//!   operations, invalidation, and statistics.
//! - [`memory_lru`]: the size-bounded in-memory tier.
//! - [`metadata`]: the durable tier, behind the [`metadata::MetadataStore`]
//!   trait, with `sqlite` and `redis` backends.
//! - [`blob_store`]: content-addressed, compressed storage for content too
//!   large to keep inline.
//! - [`integrity`]: mtime + hash freshness classification.
//! - [`lock_registry`]: per-path single-flight extraction.
//! - [`bloom`]: a negative-existence filter recording paths a fresh `stat`
//!   has already confirmed absent.
//! - [`metrics`]: Prometheus counters, gauges, and a histogram.

#![deny(unsafe_code)]

pub mod blob_store;
pub mod bloom;
pub mod config;
pub mod error;
pub mod integrity;
pub mod lock_registry;
pub mod memory_lru;
pub mod metadata;
pub mod metrics;
pub mod orchestrator;
pub mod path_validation;
pub mod types;

pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use orchestrator::{Cache, CacheStatistics, ContentExtractor};
pub use types::{CacheEntry, CachedContent, IntegrityStatus};
