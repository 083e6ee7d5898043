//! Integrity checking: content fingerprints and freshness classification.

use crate::error::Result;
use crate::types::{CacheEntry, IntegrityStatus};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::io::AsyncReadExt;

const HASH_CHUNK_SIZE: usize = 8 * 1024;

/// Computes content fingerprints and classifies stored entries against the
/// current filesystem state.
#[derive(Debug, Clone, Copy)]
pub struct IntegrityChecker {
    verify_hash: bool,
}

impl IntegrityChecker {
    pub fn new(verify_hash: bool) -> Self {
        Self { verify_hash }
    }

    /// Stream a file through SHA-256 in fixed-size chunks and return the lowercase
    /// hex digest. Never buffers the whole file.
    pub async fn compute_hash(&self, path: &Path) -> Result<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];

        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Apply the tiered freshness protocol described in the design to one entry.
    pub async fn check(&self, entry: &CacheEntry) -> IntegrityStatus {
        let metadata = match tokio::fs::metadata(&entry.file_path).await {
            Ok(m) => m,
            Err(_) => return IntegrityStatus::FileMissing,
        };

        let current_mtime = match metadata.modified() {
            Ok(m) => m
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(entry.modification_time),
            Err(_) => return IntegrityStatus::Corrupted,
        };

        if current_mtime <= entry.modification_time {
            if !self.verify_hash {
                return IntegrityStatus::Valid;
            }
            return match self.compute_hash(&entry.file_path).await {
                Ok(hash) if hash == entry.content_hash => IntegrityStatus::Valid,
                Ok(_) => IntegrityStatus::ContentChanged,
                Err(_) => IntegrityStatus::Corrupted,
            };
        }

        // mtime advanced.
        if !self.verify_hash {
            return IntegrityStatus::FileModified;
        }

        match self.compute_hash(&entry.file_path).await {
            Ok(hash) if hash == entry.content_hash => IntegrityStatus::Valid,
            Ok(_) => IntegrityStatus::ContentChanged,
            Err(_) => IntegrityStatus::Corrupted,
        }
    }

    /// Check many entries concurrently. Returns a status for every input path,
    /// including ones whose backing file is missing.
    pub async fn check_batch(&self, entries: &[CacheEntry], max_concurrent: usize) -> HashMap<PathBuf, IntegrityStatus> {
        use tokio::sync::Semaphore;
        use tokio::task::JoinSet;

        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        for entry in entries.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let checker = *self;
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                let status = checker.check(&entry).await;
                (entry.file_path, status)
            });
        }

        let mut results = HashMap::with_capacity(entries.len());
        while let Some(task_result) = tasks.join_next().await {
            if let Ok((path, status)) = task_result {
                results.insert(path, status);
            }
        }
        results
    }
}
