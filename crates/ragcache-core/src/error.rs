//! Error taxonomy for the caching and retrieval substrate.
//!
//! | Variant | Handling |
//! |---------|----------|
//! | [`Error::Configuration`] / [`Error::DimensionMismatch`] | fatal, surfaced at startup |
//! | [`Error::Provider`] | recoverable per call, nothing is cached |
//! | [`Error::Timeout`] | distinct from provider failure so callers can map it separately |
//! | [`Error::CacheCorruption`] | recovered locally by starting cold |
//! | [`Error::Storage`] | vector-store backend failure |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result alias used across ragcache.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding provider error: {message}")]
    Provider { message: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("corrupted cache file {}: {reason}", path.display())]
    CacheCorruption { path: PathBuf, reason: String },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn provider<S: Into<String>>(message: S) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn corruption<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::CacheCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Provider failures and timeouts: the request cannot be answered and
    /// callers should surface the error rather than degrade.
    pub fn is_provider_outage(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = Error::Timeout {
            operation: "vector search",
            after: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "vector search timed out after 2s");
    }

    #[test]
    fn test_provider_outage_classification() {
        assert!(Error::provider("boom").is_provider_outage());
        assert!(Error::Timeout {
            operation: "vector store search",
            after: Duration::from_secs(1)
        }
        .is_provider_outage());
        assert!(!Error::storage("disk").is_provider_outage());
        assert!(!Error::corruption("/tmp/x.json", "bad").is_provider_outage());
        assert!(!Error::configuration("bad").is_provider_outage());
    }
}
