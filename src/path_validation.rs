//! Path validation: traversal rejection and allowlist-prefix enforcement.

use crate::error::CacheError;
use std::path::{Path, PathBuf};

/// Resolve a path to absolute form and enforce the traversal and allowlist rules.
///
/// Rejects any path whose original textual representation contains `..`, then
/// canonicalizes it against the current directory (without requiring the file to
/// exist), and if `allowed_paths` is non-empty, requires the result be under one
/// of them. Violations produce `CacheError::Permission`.
pub fn validate_path(path: &Path, allowed_paths: &[PathBuf]) -> Result<PathBuf, CacheError> {
    if path.components().any(|c| c.as_os_str() == "..") {
        return Err(CacheError::permission(format!(
            "path traversal rejected: {}",
            path.display()
        )));
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| CacheError::permission_with_source("failed to resolve current directory", e))?
            .join(path)
    };

    if !allowed_paths.is_empty() && !allowed_paths.iter().any(|prefix| absolute.starts_with(prefix)) {
        return Err(CacheError::permission(format!(
            "path {} is not under any allowed prefix",
            absolute.display()
        )));
    }

    Ok(absolute)
}
