//! Content-addressed compressed blob storage, sharded by hash prefix.

use crate::error::Result;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores extracted content on disk, addressed by the content hash of its
/// source file, sharded two levels deep to keep directories small.
pub struct BlobStore {
    base_dir: PathBuf,
    compression_level: u32,
}

impl BlobStore {
    pub fn new(base_dir: PathBuf, compression_level: u32) -> Self {
        Self {
            base_dir,
            compression_level,
        }
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        let (prefix1, rest) = hash.split_at(hash.len().min(2));
        let (prefix2, _) = rest.split_at(rest.len().min(2));
        self.base_dir.join(prefix1).join(prefix2).join(format!("{hash}.gz"))
    }

    /// Compress `content` and write it under the hash's sharded path, creating
    /// intermediate directories idempotently. Returns the path written.
    pub async fn store(&self, hash: &str, content: &str) -> Result<PathBuf> {
        let path = self.blob_path(hash);
        let level = self.compression_level;
        let content = content.to_string();
        let path_clone = path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path_clone.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
            encoder.write_all(content.as_bytes())?;
            let compressed = encoder.finish()?;
            std::fs::write(&path_clone, compressed)?;
            Ok(())
        })
        .await
        .map_err(|e| crate::error::CacheError::storage_with_source("blob store task panicked", e))??;

        Ok(path)
    }

    /// Read back and decompress content for `hash`. Any I/O or decompression
    /// failure is treated as "not present" rather than propagated, per the
    /// orchestrator's cache-miss-on-corruption contract.
    pub async fn retrieve(&self, hash: &str) -> Option<String> {
        let path = self.blob_path(hash);

        tokio::task::spawn_blocking(move || -> Option<String> {
            let compressed = std::fs::read(&path).ok()?;
            let mut decoder = ZlibDecoder::new(compressed.as_slice());
            let mut out = String::new();
            match decoder.read_to_string(&mut out) {
                Ok(_) => Some(out),
                Err(e) => {
                    debug!("blob decompression failed for {:?}: {}", path, e);
                    None
                }
            }
        })
        .await
        .unwrap_or(None)
    }

    /// Delete a blob, opportunistically pruning up to two levels of now-empty
    /// parent directories. Missing blobs are not an error.
    pub fn delete(&self, hash: &str) -> bool {
        let path = self.blob_path(hash);
        if std::fs::remove_file(&path).is_err() {
            return false;
        }

        let mut dir = path.parent().map(Path::to_path_buf);
        for _ in 0..2 {
            let Some(d) = dir else { break };
            match std::fs::remove_dir(&d) {
                Ok(()) => dir = d.parent().map(Path::to_path_buf),
                Err(e) => {
                    debug!("leaving non-empty blob directory {:?}: {}", d, e);
                    break;
                }
            }
        }

        true
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.blob_path(hash).exists()
    }

    /// Compressed on-disk byte count, or 0 if absent.
    pub fn size(&self, hash: &str) -> u64 {
        std::fs::metadata(self.blob_path(hash)).map(|m| m.len()).unwrap_or(0)
    }
}
