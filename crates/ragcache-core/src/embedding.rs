//! The embedding provider seam and the vector helpers shared by the caches
//! and stores.
//!
//! HTTP providers (Ollama, OpenAI) and the disabled provider live in the
//! `ragcache` crate; this module only knows about plain `f32` vectors.

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

/// Something that turns text into fixed-size vectors.
///
/// One call embeds one batch: the result holds exactly one vector per input,
/// in input order, or the whole batch fails.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, e.g. `"mistral"`. Part of the embedding cache key.
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Why a vector cannot be cached or indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorDefect {
    WrongLength { expected: usize, actual: usize },
    NonFinite,
}

impl fmt::Display for VectorDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongLength { expected, actual } => {
                write!(f, "{}-dimensional vector, expected {}", actual, expected)
            }
            Self::NonFinite => f.write_str("vector with NaN or infinite components"),
        }
    }
}

/// Check that `vector` has `dims` finite components.
pub fn inspect_vector(vector: &[f32], dims: usize) -> Option<VectorDefect> {
    if vector.len() != dims {
        return Some(VectorDefect::WrongLength {
            expected: dims,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Some(VectorDefect::NonFinite);
    }
    None
}

/// Little-endian `f32` bytes, 4 per component.
///
/// ```rust
/// use ragcache_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let blob = vec_to_blob(&[0.5, -1.0]);
/// assert_eq!(blob.len(), 8);
/// assert_eq!(blob_to_vec(&blob), vec![0.5, -1.0]);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]; a trailing partial component is dropped.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity clamped to `[-1, 1]`. This is the score every vector
/// store reports.
///
/// Mismatched lengths, empty input and zero vectors score `0.0`.
/// Accumulates in `f64` so long vectors of small components stay stable.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
        (0.0f64, 0.0f64, 0.0f64),
        |(dot, na, nb), (&x, &y)| {
            let (x, y) = (f64::from(x), f64::from(y));
            (dot + x * y, na + x * x, nb + y * y)
        },
    );

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return 0.0;
    }
    (dot / denom).clamp(-1.0, 1.0) as f32
}
