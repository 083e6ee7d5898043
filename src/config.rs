//! Configuration for the cache orchestrator.
//!
//! Mirrors the teacher's `ExtractionConfig` shape: a single `serde`-backed
//! struct, a `Default` impl with sane values, and a `validate()` pass run at
//! construction time (not on every access).

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Byte size beyond which extracted content is externalized into the blob store
/// instead of being stored inline in the persistent metadata store.
pub const EXTERNALIZATION_THRESHOLD: usize = 1024 * 1024;

const MIN_MEMORY_SIZE: u64 = 1024 * 1024;
const MAX_MEMORY_SIZE: u64 = 10 * 1024 * 1024 * 1024;

fn default_max_memory_size() -> u64 {
    256 * 1024 * 1024
}

fn default_db_pool_size() -> usize {
    num_cpus::get().max(1)
}

fn default_compression_level() -> u32 {
    6
}

fn default_bloom_filter_size() -> usize {
    100_000
}

/// Cache configuration, recognized options per the design's configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory for persistent metadata and blobs.
    pub cache_dir: PathBuf,

    /// Byte limit for the in-memory LRU. Validated to `[1 MiB, 10 GiB]`.
    #[serde(default = "default_max_memory_size")]
    pub max_memory_size: u64,

    /// If false, skip hash verification; mtime alone drives freshness.
    #[serde(default = "default_true")]
    pub verify_hash: bool,

    /// Maximum concurrent persistent-store connections.
    #[serde(default = "default_db_pool_size")]
    pub db_pool_size: usize,

    /// zlib level in `[0, 9]` for the blob store.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Capacity of the negative-existence filter.
    #[serde(default = "default_bloom_filter_size")]
    pub bloom_filter_size: usize,

    /// If non-empty, every accessed path must resolve under one of these prefixes.
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,

    /// Enables verbose logging; no semantic effect.
    #[serde(default)]
    pub debug: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".contentcache"),
            max_memory_size: default_max_memory_size(),
            verify_hash: true,
            db_pool_size: default_db_pool_size(),
            compression_level: default_compression_level(),
            bloom_filter_size: default_bloom_filter_size(),
            allowed_paths: Vec::new(),
            debug: false,
        }
    }
}

impl CacheConfig {
    /// Load configuration from a TOML string.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| CacheError::configuration_with_source("invalid TOML config", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CacheError::configuration_with_source(format!("failed to read {:?}", path.as_ref()), e))?;
        Self::from_toml_str(&contents)
    }

    /// Validate range and consistency constraints. Called once at cache construction.
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_size < MIN_MEMORY_SIZE || self.max_memory_size > MAX_MEMORY_SIZE {
            return Err(CacheError::configuration(format!(
                "max_memory_size must be within [{MIN_MEMORY_SIZE}, {MAX_MEMORY_SIZE}], got {}",
                self.max_memory_size
            )));
        }

        if self.compression_level > 9 {
            return Err(CacheError::configuration(format!(
                "compression_level must be within [0, 9], got {}",
                self.compression_level
            )));
        }

        if self.db_pool_size == 0 {
            return Err(CacheError::configuration("db_pool_size must be at least 1"));
        }

        if self.bloom_filter_size == 0 {
            return Err(CacheError::configuration("bloom_filter_size must be at least 1"));
        }

        Ok(())
    }
}
