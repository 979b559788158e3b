//! Content fingerprints.
//!
//! A [`Fingerprint`] is the SHA-256 of a text's raw UTF-8 bytes, rendered
//! as 64 lowercase hex characters. It is both the embedding-cache key and
//! the duplicate detector, so two texts share a fingerprint only if they
//! are byte-for-byte identical.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of a text blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint a text blob.
///
/// ```rust
/// use ragcache_core::fingerprint;
///
/// let a = fingerprint("hello");
/// assert_eq!(a, fingerprint("hello"));
/// assert_ne!(a, fingerprint("hello "));
/// assert_eq!(a.as_str().len(), 64);
/// ```
pub fn fingerprint(text: &str) -> Fingerprint {
    fingerprint_bytes(text.as_bytes())
}

/// Fingerprint arbitrary bytes (used for whole cache files).
pub fn fingerprint_bytes(bytes: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Fingerprint(format!("{:x}", hasher.finalize()))
}
