//! Core data model: stored entries, returned results, and integrity status.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The unit of storage tracked per source file path.
///
/// See the module invariants in the design doc: exactly one of `content` or
/// `content_blob_path` (with the blob present) holds for any entry that is
/// retrievable to callers; `access_count` is non-decreasing across updates
/// for a given path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// Absolute filesystem path; primary key in the persistent store.
    pub file_path: PathBuf,
    /// Hex-encoded SHA-256 of the raw file bytes (64 characters).
    pub content_hash: String,
    /// Seconds since epoch, captured from the filesystem at extraction time.
    pub modification_time: f64,
    /// Size in bytes of the source file.
    pub file_size: u64,
    /// Extracted textual content, present when inline-storable or hydrated from a blob.
    pub content: Option<String>,
    /// Location of externalized content; present iff content exceeded the threshold.
    pub content_blob_path: Option<PathBuf>,
    /// Wall-clock time of the extraction that produced `content`.
    pub extraction_timestamp: f64,
    /// Monotonically increasing count of served reads.
    pub access_count: u64,
    /// Wall-clock time of the most recent served read.
    pub last_accessed: f64,
}

impl CacheEntry {
    /// Approximate in-memory footprint: object overhead plus content, path, and hash bytes.
    ///
    /// Deliberately approximate (see design notes): callers should only rely on relative
    /// comparisons against the LRU's byte limit, never on exact equality.
    pub fn approximate_size(&self) -> usize {
        const OBJECT_OVERHEAD: usize = 128;
        let content_len = self.content.as_ref().map_or(0, |c| c.len());
        let path_len = self.file_path.as_os_str().len();
        let hash_len = self.content_hash.len();
        OBJECT_OVERHEAD + content_len + path_len + hash_len
    }
}

/// Result handed back to callers of `get_content`. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedContent {
    pub content: String,
    pub from_cache: bool,
    pub content_hash: String,
    pub extraction_timestamp: f64,
    pub file_size: u64,
}

/// Classification produced by the integrity checker for a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityStatus {
    /// Entry matches the current file state and is safe to serve.
    Valid,
    /// The source file no longer exists.
    FileMissing,
    /// mtime advanced and hashing is disabled, so freshness can't be confirmed or denied.
    FileModified,
    /// mtime advanced and the recomputed hash differs from the stored one.
    ContentChanged,
    /// The stored entry itself is internally inconsistent (never surfaced to callers).
    Corrupted,
}
