//! LRU + TTL document cache persisted as one JSON file per entry.
//!
//! ```text
//! {document_dir}/{fingerprint(key)}.json
//! {"key", "content", "metadata": {"created_at", "last_accessed", "expires_at",
//!                                 "source", "version", "content_hash", "embedding_id"}}
//! ```
//!
//! Disk is the source of truth across restarts: [`DocumentCache::open`]
//! loads every entry file and restores recency order from `last_accessed`.
//! Within a run the in-memory [`LruIndex`] owns recency; reads do not
//! rewrite entry files.
//!
//! Expired entries are dropped lazily by [`DocumentCache::get`] and eagerly
//! by [`DocumentCache::sweep`], which [`DocumentCache::start_maintenance`]
//! runs on an interval until the returned handle is stopped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ragcache_core::lru::LruIndex;
use ragcache_core::{fingerprint, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::fs_util::{remove_if_exists, write_atomic};
use crate::maintenance::{optimize_directory, OptimizeReport};

pub const DEFAULT_ENTRY_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub source: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub content_hash: String,
    #[serde(default)]
    pub embedding_id: Option<String>,
}

fn default_version() -> String {
    DEFAULT_ENTRY_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub content: Value,
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.metadata.expires_at, Some(at) if at <= now)
    }

    /// The content as text, when it was stored as a string.
    pub fn content_str(&self) -> Option<&str> {
        self.content.as_str()
    }
}

/// Hash of cached content. Strings hash their raw text so callers can
/// compare against `fingerprint(body)`; other values hash their JSON.
pub fn content_hash(content: &Value) -> Result<String> {
    Ok(match content {
        Value::String(s) => fingerprint(s).to_string(),
        other => fingerprint(&serde_json::to_string(other)?).to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct DocumentCacheOptions {
    pub dir: PathBuf,
    pub max_entries: usize,
    pub default_ttl: chrono::Duration,
}

impl DocumentCacheOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dir: config.cache.document_dir.clone(),
            max_entries: config.cache.max_entries,
            default_ttl: config.cache.default_ttl(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DocumentCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

pub struct DocumentCache {
    dir: PathBuf,
    max_entries: usize,
    default_ttl: chrono::Duration,
    /// Held across each operation's disk writes.
    entries: Mutex<LruIndex<CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl DocumentCache {
    /// Open the cache directory, loading every readable entry file.
    pub async fn open(options: DocumentCacheOptions) -> Result<Self> {
        if options.max_entries == 0 {
            return Err(Error::configuration("document cache max_entries must be > 0"));
        }
        tokio::fs::create_dir_all(&options.dir).await?;

        let cache = Self {
            dir: options.dir,
            max_entries: options.max_entries,
            default_ttl: options.default_ttl,
            entries: Mutex::new(LruIndex::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        };
        {
            let mut entries = cache.entries.lock().await;
            cache.reload(&mut entries).await?;
            info!(
                dir = %cache.dir.display(),
                entries = entries.len(),
                "document cache opened"
            );
        }
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint(key)))
    }

    /// Delete `key`'s file, then drop it from memory. A failed delete leaves
    /// the entry in both places.
    async fn discard(&self, entries: &mut LruIndex<CacheEntry>, key: &str) -> Result<bool> {
        remove_if_exists(&self.entry_path(key)).await?;
        Ok(entries.remove(key).is_some())
    }

    /// Evict least recently used entries until at most `limit` remain.
    async fn evict_to(&self, entries: &mut LruIndex<CacheEntry>, limit: usize) -> Result<usize> {
        let mut evicted = 0;
        while entries.len() > limit {
            let Some(key) = entries.oldest().map(str::to_string) else {
                break;
            };
            self.discard(entries, &key).await?;
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "document cache evicted least recently used entry");
            evicted += 1;
        }
        Ok(evicted)
    }

    /// Replace the in-memory index with what is on disk.
    async fn reload(&self, entries: &mut LruIndex<CacheEntry>) -> Result<()> {
        entries.clear();
        let mut loaded = load_entries(&self.dir).await?;
        loaded.sort_by_key(|e| e.metadata.last_accessed);
        for entry in loaded {
            entries.insert(entry.key.clone(), entry);
        }
        self.evict_to(entries, self.max_entries).await?;
        Ok(())
    }

    /// Look up `key`. A hit refreshes `last_accessed` and makes the entry
    /// most recently used; an expired entry is removed and reported absent.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;

        if entries.peek(key).is_some_and(|e| e.is_expired(now)) {
            self.discard(&mut entries, key).await?;
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key, "document cache entry expired");
            return Ok(None);
        }

        match entries.touch(key) {
            Some(entry) => {
                entry.metadata.last_accessed = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Store `content` under `key` with the default entry version.
    /// `ttl` of `None` uses the configured default; a TTL of zero or less
    /// stores an entry that is already expired, and a TTL reaching past the
    /// representable date range stores one that never expires.
    pub async fn put(
        &self,
        key: &str,
        content: impl Into<Value>,
        source: &str,
        ttl: Option<chrono::Duration>,
    ) -> Result<CacheEntry> {
        self.put_versioned(key, content, source, DEFAULT_ENTRY_VERSION, ttl)
            .await
    }

    pub async fn put_versioned(
        &self,
        key: &str,
        content: impl Into<Value>,
        source: &str,
        version: &str,
        ttl: Option<chrono::Duration>,
    ) -> Result<CacheEntry> {
        let content = content.into();
        let now = Utc::now();
        let ttl = ttl.unwrap_or(self.default_ttl).max(chrono::Duration::zero());
        let entry = CacheEntry {
            key: key.to_string(),
            metadata: EntryMetadata {
                created_at: now,
                last_accessed: now,
                expires_at: now.checked_add_signed(ttl),
                source: source.to_string(),
                version: version.to_string(),
                content_hash: content_hash(&content)?,
                embedding_id: None,
            },
            content,
        };

        let bytes = serde_json::to_vec(&entry)?;
        let mut entries = self.entries.lock().await;
        write_atomic(&self.entry_path(key), &bytes).await?;
        entries.insert(key.to_string(), entry.clone());

        // The new entry is committed on disk and in memory either way; a
        // failed eviction leaves the cache one over capacity until a sweep.
        self.evict_to(&mut entries, self.max_entries).await?;
        Ok(entry)
    }

    /// Link an existing entry to an embedding record.
    pub async fn set_embedding_id(&self, key: &str, embedding_id: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.touch(key) else {
            return Ok(false);
        };
        entry.metadata.embedding_id = Some(embedding_id.to_string());
        let bytes = serde_json::to_vec(&*entry)?;
        write_atomic(&self.entry_path(key), &bytes).await?;
        Ok(true)
    }

    pub async fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        self.discard(&mut entries, key).await
    }

    pub async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let keys: Vec<String> = entries.keys_by_recency().map(str::to_string).collect();
        for key in &keys {
            self.discard(&mut entries, key).await?;
        }
        info!(removed = keys.len(), "document cache cleared");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove expired entries, then evict least recently used entries while
    /// over capacity.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        let mut report = SweepReport::default();

        let expired: Vec<String> = entries
            .keys_by_recency()
            .filter(|k| entries.peek(k).is_some_and(|e| e.is_expired(now)))
            .map(str::to_string)
            .collect();
        for key in expired {
            self.discard(&mut entries, &key).await?;
            report.expired += 1;
        }
        report.evicted = self.evict_to(&mut entries, self.max_entries).await?;

        self.expirations
            .fetch_add(report.expired as u64, Ordering::Relaxed);
        if report.expired + report.evicted > 0 {
            info!(
                expired = report.expired,
                evicted = report.evicted,
                remaining = entries.len(),
                "document cache sweep"
            );
        }
        Ok(report)
    }

    /// Deduplicate and compact the cache directory, then reload the index.
    pub async fn optimize(&self) -> Result<OptimizeReport> {
        let mut entries = self.entries.lock().await;
        let report = optimize_directory(&self.dir).await?;
        self.reload(&mut entries).await?;
        Ok(report)
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the handle is stopped.
    pub fn start_maintenance(self: &Arc<Self>, interval: Duration) -> MaintenanceHandle {
        let cache = Arc::clone(self);
        let token = CancellationToken::new();
        let child = token.clone();

        let task = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "document cache maintenance started");
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = cache.sweep().await {
                            warn!(error = %e, "document cache sweep failed");
                        }
                    }
                }
            }
            info!("document cache maintenance stopped");
        });

        MaintenanceHandle { token, task }
    }

    fn counters(&self) -> (u64, u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
            self.expirations.load(Ordering::Relaxed),
        )
    }

    pub async fn stats(&self) -> DocumentCacheStats {
        let (hits, misses, evictions, expirations) = self.counters();
        DocumentCacheStats {
            entries: self.len().await,
            hits,
            misses,
            evictions,
            expirations,
        }
    }
}

/// Handle to a running maintenance loop.
pub struct MaintenanceHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Cancel the loop and wait for it to exit. A sweep in progress finishes
    /// first.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "document cache maintenance task panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn load_entries(dir: &Path) -> Result<Vec<CacheEntry>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut loaded = Vec::new();

    while let Some(item) = reader.next_entry().await? {
        let path = item.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_entry(&path).await {
            Ok(entry) => loaded.push(entry),
            Err(e) => warn!(error = %e, "skipping unreadable document cache file"),
        }
    }
    Ok(loaded)
}

async fn read_entry(path: &Path) -> Result<CacheEntry> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::corruption(path, e.to_string()))?;
    let entry: CacheEntry =
        serde_json::from_slice(&bytes).map_err(|e| Error::corruption(path, e.to_string()))?;
    let expected = format!("{}.json", fingerprint(&entry.key));
    if path.file_name().and_then(|n| n.to_str()) != Some(expected.as_str()) {
        return Err(Error::corruption(path, "file name does not match entry key"));
    }
    Ok(entry)
}
