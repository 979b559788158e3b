//! Content-addressed embedding cache.
//!
//! Texts are keyed by their SHA-256 [`Fingerprint`], so a chunk that has
//! been embedded once is never sent to the provider again, across calls and
//! across restarts. The whole cache lives in one JSON file per model:
//!
//! ```text
//! {embedding_dir}/embeddings_cache_{model}.json
//! {"metadata": {"model", "dimension", "created_at", "content_hash", "format_version"},
//!  "vectors":  {"<fingerprint>": [f32, ...], ...}}
//! ```
//!
//! # Batching
//!
//! [`EmbeddingCache::embed`] walks the input in batches of `batch_size`.
//! Each batch makes at most one provider call, for its distinct misses.
//! New vectors are committed (and the file rewritten) only after every
//! batch has succeeded, so a failed call caches nothing.
//!
//! Calls that miss take a fill lock for the whole provider-and-commit
//! phase, so concurrent requests for the same uncached text reach the
//! provider once. Calls that are all hits never wait on it.
//!
//! Entries never expire: a vector is a pure function of model and text.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ragcache_core::embedding::{inspect_vector, EmbeddingProvider};
use ragcache_core::fingerprint::fingerprint_bytes;
use ragcache_core::{fingerprint, Error, Fingerprint, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::fs_util::write_atomic;

/// Version of the on-disk cache layout.
pub const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingCacheMetadata {
    pub model: String,
    pub dimension: usize,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
    #[serde(default = "default_format_version")]
    pub format_version: u32,
}

fn default_format_version() -> u32 {
    CACHE_FORMAT_VERSION
}

#[derive(Debug, Serialize, Deserialize)]
struct EmbeddingCacheFile {
    metadata: EmbeddingCacheMetadata,
    vectors: BTreeMap<Fingerprint, Vec<f32>>,
}

/// Where and how an [`EmbeddingCache`] operates.
#[derive(Debug, Clone)]
pub struct EmbeddingCacheOptions {
    pub dir: PathBuf,
    pub batch_size: usize,
    pub timeout: Duration,
}

impl EmbeddingCacheOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dir: config.cache.embedding_dir.clone(),
            batch_size: config.embedding.batch_size,
            timeout: config.embedding.timeout(),
        }
    }
}

/// Per-call switches for [`EmbeddingCache::embed_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedOptions {
    /// `false` sends every text to the provider and leaves the cache
    /// untouched, neither read nor written.
    pub use_cache: bool,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self { use_cache: true }
    }
}

impl EmbedOptions {
    pub fn uncached() -> Self {
        Self { use_cache: false }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbeddingCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub provider_calls: u64,
}

impl EmbeddingCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    path: PathBuf,
    batch_size: usize,
    timeout: Duration,
    vectors: Mutex<BTreeMap<Fingerprint, Vec<f32>>>,
    /// Held by calls with misses from first provider call to commit.
    fill_lock: Mutex<()>,
    /// Serializes snapshot + write + rename of the cache file.
    persist_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    provider_calls: AtomicU64,
}

/// File name for a model's cache. Path separators and other unsafe
/// characters in model names (`library/mistral:7b`) become `_`.
pub fn cache_file_name(model: &str) -> String {
    let safe: String = model
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("embeddings_cache_{}.json", safe)
}

impl EmbeddingCache {
    /// Open the cache for `provider`'s model, loading any persisted vectors.
    ///
    /// A missing file is an empty cache. A file for a different model or
    /// dimension is discarded; an unreadable one is logged as corruption.
    /// Either way the cache starts cold rather than failing.
    pub async fn open(
        provider: Arc<dyn EmbeddingProvider>,
        options: EmbeddingCacheOptions,
    ) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(Error::configuration("embedding batch size must be > 0"));
        }
        tokio::fs::create_dir_all(&options.dir).await?;
        let path = options.dir.join(cache_file_name(provider.model_name()));
        let vectors = load_vectors(&path, provider.model_name(), provider.dims()).await;
        info!(
            path = %path.display(),
            model = provider.model_name(),
            entries = vectors.len(),
            "embedding cache opened"
        );

        Ok(Self {
            provider,
            path,
            batch_size: options.batch_size,
            timeout: options.timeout,
            vectors: Mutex::new(vectors),
            fill_lock: Mutex::new(()),
            persist_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            provider_calls: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    /// Embed `texts`, one vector per input in input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_with(texts, EmbedOptions::default()).await
    }

    pub async fn embed_with(&self, texts: &[String], options: EmbedOptions) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if !options.use_cache {
            return self.embed_uncached(texts).await;
        }
        if let Some(vectors) = self.lookup_all(texts).await {
            return Ok(vectors);
        }

        let _fill = self.fill_lock.lock().await;
        let mut output: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        // Vectors computed by earlier batches of this call, not yet committed.
        let mut fresh: BTreeMap<Fingerprint, Vec<f32>> = BTreeMap::new();

        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            let offset = batch_no * self.batch_size;
            let mut pending: Vec<(Fingerprint, Vec<usize>)> = Vec::new();
            let mut pending_pos: HashMap<Fingerprint, usize> = HashMap::new();
            let mut miss_texts: Vec<String> = Vec::new();

            {
                let cached = self.vectors.lock().await;
                for (i, text) in batch.iter().enumerate() {
                    let fp = fingerprint(text);
                    let position = offset + i;
                    if let Some(vector) = cached.get(&fp).or_else(|| fresh.get(&fp)) {
                        output[position] = Some(vector.clone());
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    match pending_pos.get(&fp) {
                        Some(&slot) => pending[slot].1.push(position),
                        None => {
                            pending_pos.insert(fp.clone(), pending.len());
                            pending.push((fp, vec![position]));
                            miss_texts.push(text.clone());
                        }
                    }
                }
            }

            if pending.is_empty() {
                continue;
            }

            let vectors = self.call_provider(&miss_texts).await?;
            for ((fp, positions), vector) in pending.into_iter().zip(vectors) {
                for position in positions {
                    output[position] = Some(vector.clone());
                }
                fresh.insert(fp, vector);
            }
        }

        if !fresh.is_empty() {
            let added = fresh.len();
            self.vectors.lock().await.extend(fresh);
            match self.persist().await {
                Ok(()) => debug!(added, path = %self.path.display(), "embedding cache saved"),
                // The vectors are valid; the next successful save carries them.
                Err(e) => warn!(error = %e, path = %self.path.display(), "failed to save embedding cache"),
            }
        }

        output
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::provider("embedding result incomplete"))
    }

    /// Embed a single query string through the same cached path.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_query_with(text, EmbedOptions::default()).await
    }

    pub async fn embed_query_with(&self, text: &str, options: EmbedOptions) -> Result<Vec<f32>> {
        self.embed_with(&[text.to_string()], options)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider("provider returned no vector for query"))
    }

    /// Every vector from the cache, or `None` if any text misses. Counts
    /// hits only when it answers the call.
    async fn lookup_all(&self, texts: &[String]) -> Option<Vec<Vec<f32>>> {
        let cached = self.vectors.lock().await;
        let vectors = texts
            .iter()
            .map(|text| cached.get(&fingerprint(text)).cloned())
            .collect::<Option<Vec<_>>>()?;
        self.hits.fetch_add(vectors.len() as u64, Ordering::Relaxed);
        Some(vectors)
    }

    /// One provider call per batch, as given. Nothing is read from or
    /// committed to the cache.
    async fn embed_uncached(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut output = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            output.extend(self.call_provider(batch).await?);
        }
        Ok(output)
    }

    async fn call_provider(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
        debug!(
            count = texts.len(),
            model = self.provider.model_name(),
            "embedding cache misses"
        );

        let vectors = tokio::time::timeout(self.timeout, self.provider.embed(texts))
            .await
            .map_err(|_| Error::Timeout {
                operation: "embedding provider",
                after: self.timeout,
            })??;

        if vectors.len() != texts.len() {
            return Err(Error::provider(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        let dims = self.provider.dims();
        if let Some(defect) = vectors.iter().find_map(|v| inspect_vector(v, dims)) {
            return Err(Error::provider(format!("provider returned a {}", defect)));
        }
        Ok(vectors)
    }

    /// Write the full cache to disk atomically.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let vectors = self.vectors.lock().await.clone();
        let file = EmbeddingCacheFile {
            metadata: EmbeddingCacheMetadata {
                model: self.provider.model_name().to_string(),
                dimension: self.provider.dims(),
                created_at: Utc::now(),
                content_hash: vectors_hash(&vectors)?,
                format_version: CACHE_FORMAT_VERSION,
            },
            vectors,
        };
        let bytes = serde_json::to_vec(&file)?;
        write_atomic(&self.path, &bytes).await?;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.vectors.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> EmbeddingCacheStats {
        EmbeddingCacheStats {
            entries: self.len().await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
        }
    }
}

fn vectors_hash(vectors: &BTreeMap<Fingerprint, Vec<f32>>) -> Result<String> {
    let bytes = serde_json::to_vec(vectors)?;
    Ok(fingerprint_bytes(&bytes).to_string())
}

async fn load_vectors(path: &Path, model: &str, dims: usize) -> BTreeMap<Fingerprint, Vec<f32>> {
    let file = match read_cache_file(path).await {
        Ok(Some(file)) => file,
        Ok(None) => return BTreeMap::new(),
        Err(e) => {
            warn!(error = %e, "embedding cache unreadable, starting cold");
            return BTreeMap::new();
        }
    };

    if file.metadata.model != model || file.metadata.dimension != dims {
        warn!(
            path = %path.display(),
            cached_model = %file.metadata.model,
            cached_dimension = file.metadata.dimension,
            model,
            dimension = dims,
            "embedding cache was built for a different model, discarding"
        );
        return BTreeMap::new();
    }
    if let Some(defect) = file.vectors.values().find_map(|v| inspect_vector(v, dims)) {
        let e = Error::corruption(path, format!("cached {}", defect));
        warn!(error = %e, "embedding cache unreadable, starting cold");
        return BTreeMap::new();
    }
    file.vectors
}

async fn read_cache_file(path: &Path) -> Result<Option<EmbeddingCacheFile>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::corruption(path, e.to_string())),
    };
    let file: EmbeddingCacheFile =
        serde_json::from_slice(&bytes).map_err(|e| Error::corruption(path, e.to_string()))?;
    if vectors_hash(&file.vectors)? != file.metadata.content_hash {
        return Err(Error::corruption(path, "content hash does not match vectors"));
    }
    Ok(Some(file))
}
