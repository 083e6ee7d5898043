//! Error types for contentcache.
//!
//! All fallible operations in this crate return [`Result<T>`]. Errors follow
//! the error-kind taxonomy from the design: system I/O errors always bubble
//! up unchanged, application-level failures are wrapped with context and an
//! optional source.
//!
//! Integrity classification (`corrupted`, see [`crate::types::IntegrityStatus`])
//! is deliberately **not** a variant here: a corrupted entry degrades to a
//! cache miss inside the orchestrator and is never returned to a caller.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`CacheError`].
pub type Result<T> = std::result::Result<T, CacheError>;

/// Main error type for all contentcache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("permission error: {message}")]
    Permission {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("processing error: {message}")]
    Processing {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

#[cfg(feature = "sqlite-backend")]
impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Storage {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Storage {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Storage {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $with_source:ident, $variant:ident) => {
        #[doc = concat!("Create a ", stringify!($variant), " error")]
        pub fn $name<S: Into<String>>(message: S) -> Self {
            Self::$variant {
                message: message.into(),
                source: None,
            }
        }

        #[doc = concat!("Create a ", stringify!($variant), " error with a source")]
        pub fn $with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
            message: S,
            source: E,
        ) -> Self {
            Self::$variant {
                message: message.into(),
                source: Some(Box::new(source)),
            }
        }
    };
}

impl CacheError {
    error_constructor!(permission, permission_with_source, Permission);
    error_constructor!(storage, storage_with_source, Storage);
    error_constructor!(configuration, configuration_with_source, Configuration);
    error_constructor!(processing, processing_with_source, Processing);

    /// The `cache_errors_total{type=...}` label this error should be counted under.
    pub fn metric_label(&self) -> &'static str {
        match self {
            CacheError::Io(_) => "io",
            CacheError::NotFound { .. } => "not_found",
            CacheError::Permission { .. } => "permission",
            CacheError::Storage { .. } => "storage",
            CacheError::Configuration { .. } => "configuration",
            CacheError::Processing { .. } => "processing",
            CacheError::LockPoisoned(_) => "lock_poisoned",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_bubbles_unchanged() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CacheError = io_err.into();
        assert!(matches!(err, CacheError::Io(_)));
    }

    #[test]
    fn not_found_reports_path() {
        let err = CacheError::NotFound {
            path: PathBuf::from("/tmp/missing.txt"),
        };
        assert!(err.to_string().contains("missing.txt"));
    }

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::other("disk full");
        let err = CacheError::storage_with_source("failed to write entry", source);
        assert_eq!(err.to_string(), "storage error: failed to write entry");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn metric_labels_are_stable() {
        assert_eq!(CacheError::configuration("bad").metric_label(), "configuration");
        assert_eq!(CacheError::processing("bad").metric_label(), "processing");
        assert_eq!(CacheError::LockPoisoned("x".into()).metric_label(), "lock_poisoned");
    }

    #[test]
    fn serde_json_error_converts_to_storage() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: CacheError = json_err.into();
        assert!(matches!(err, CacheError::Storage { .. }));
    }
}
