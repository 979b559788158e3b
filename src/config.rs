//! TOML configuration parsing and validation.
//!
//! Every field has a default, so an empty file (or [`Config::default`]) is a
//! working configuration with embeddings disabled. After parsing,
//! [`load_config`] applies the environment overrides the deployment uses
//! (`DOCUMENT_CACHE_SIZE`, `EMBEDDINGS_BATCH_SIZE`, …) and validates the
//! result. Invalid settings are a [`Error::Configuration`], reported at
//! startup rather than on first use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ragcache_core::chunk::ChunkerConfig;
use ragcache_core::{Error, Result};
use serde::Deserialize;

/// Upper bound for day counts (`cache.ttl_days`, `--older-than-days`).
/// Larger values would overflow date arithmetic.
pub const MAX_DAYS: i64 = 36_500;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_document_dir")]
    pub document_dir: PathBuf,
    #[serde(default = "default_embedding_dir")]
    pub embedding_dir: PathBuf,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            document_dir: default_document_dir(),
            embedding_dir: default_embedding_dir(),
            max_entries: default_max_entries(),
            max_size_mb: default_max_size_mb(),
            ttl_days: default_ttl_days(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_document_dir() -> PathBuf {
    PathBuf::from("data/document_cache")
}
fn default_embedding_dir() -> PathBuf {
    PathBuf::from("data/embeddings_cache")
}
fn default_max_entries() -> usize {
    1000
}
fn default_max_size_mb() -> u64 {
    1000
}
fn default_ttl_days() -> i64 {
    7
}
fn default_cleanup_interval_secs() -> u64 {
    3600
}

impl CacheConfig {
    pub fn default_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.ttl_days.clamp(-MAX_DAYS, MAX_DAYS))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "mistral".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    10
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            lookahead: default_lookahead(),
            max_chunks: default_max_chunks(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}
fn default_lookahead() -> usize {
    100
}
fn default_max_chunks() -> usize {
    10_000
}

impl ChunkingConfig {
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            lookahead: self.lookahead,
            max_chunks: self.max_chunks,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub min_score: f32,
    #[serde(default = "default_retrieval_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: 0.0,
            timeout_secs: default_retrieval_timeout_secs(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_retrieval_timeout_secs() -> u64 {
    10
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
        }
    }
}

fn default_backend() -> String {
    "flat".to_string()
}
fn default_store_path() -> PathBuf {
    PathBuf::from("data/band_docs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

impl Config {
    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (the environment in production,
    /// a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DOCUMENT_CACHE_DIR") {
            self.cache.document_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("EMBEDDINGS_CACHE_DIR") {
            self.cache.embedding_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DOCUMENT_CACHE_SIZE") {
            self.cache.max_entries = parse_env("DOCUMENT_CACHE_SIZE", &v)?;
        }
        if let Some(v) = lookup("DOCUMENT_CACHE_TTL") {
            self.cache.ttl_days = parse_env("DOCUMENT_CACHE_TTL", &v)?;
        }
        if let Some(v) = lookup("CACHE_CLEANUP_INTERVAL") {
            self.cache.cleanup_interval_secs = parse_env("CACHE_CLEANUP_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("EMBEDDINGS_BATCH_SIZE") {
            self.embedding.batch_size = parse_env("EMBEDDINGS_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("VECTOR_STORE_TYPE") {
            self.vector_store.backend = v.to_lowercase();
        }
        Ok(())
    }

    /// Check every invariant the components rely on.
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(Error::configuration("cache.max_entries must be > 0"));
        }
        if !(0..=MAX_DAYS).contains(&self.cache.ttl_days) {
            return Err(Error::configuration(format!(
                "cache.ttl_days must be between 0 and {}",
                MAX_DAYS
            )));
        }
        if self.cache.cleanup_interval_secs == 0 {
            return Err(Error::configuration("cache.cleanup_interval_secs must be > 0"));
        }

        if self.embedding.batch_size == 0 {
            return Err(Error::configuration("embedding.batch_size must be > 0"));
        }
        if self.embedding.dims == 0 {
            return Err(Error::configuration("embedding.dims must be > 0"));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(Error::configuration("embedding.model must not be empty"));
        }
        match self.embedding.provider.as_str() {
            "disabled" | "ollama" | "openai" => {}
            other => {
                return Err(Error::configuration(format!(
                    "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
                    other
                )))
            }
        }

        if self.chunking.chunk_size == 0 {
            return Err(Error::configuration("chunking.chunk_size must be > 0"));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(Error::configuration(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }

        if self.retrieval.top_k < 1 {
            return Err(Error::configuration("retrieval.top_k must be >= 1"));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.min_score) {
            return Err(Error::configuration(
                "retrieval.min_score must be in [-1.0, 1.0]",
            ));
        }

        match self.vector_store.backend.as_str() {
            "flat" | "sqlite" => {}
            other => {
                return Err(Error::configuration(format!(
                    "Unknown vector store backend: '{}'. Must be flat or sqlite.",
                    other
                )))
            }
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::configuration(format!("environment variable {} has invalid value '{}'", key, value))
    })
}

/// Parse a TOML config file, apply environment overrides, and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::configuration(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let mut config = parse_config(&content)?;
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Like [`load_config`], but a missing file means "all defaults" (still
/// subject to environment overrides and validation).
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return load_config(path);
    }
    let mut config = Config::default();
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Parse TOML text without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content)
        .map_err(|e| Error::configuration(format!("Failed to parse config file: {}", e)))
}
