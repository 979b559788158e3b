//! # ragcache
//!
//! Caching and retrieval substrate for retrieval-augmented chat backends.
//!
//! Documents are chunked, embedded through a content-addressed embedding
//! cache, and stored in a persistent vector index. At query time the query
//! goes through the same cache, the index returns the most similar chunks,
//! and the retriever renders them as prompt context. A separate LRU + TTL
//! document cache keeps raw documents on disk between runs.
//!
//! ## Architecture
//!
//! ```text
//!             ┌───────────┐   ┌────────────────┐   ┌─────────────┐
//! ingest ───▶ │  Chunker  │──▶│ EmbeddingCache │──▶│ VectorStore │
//!             └───────────┘   │  (provider)    │   │ flat/sqlite │
//!                             └───────▲────────┘   └──────┬──────┘
//!                                     │                   │
//! query ──────────────────────────────┴──── Retriever ◀───┘
//!
//!             ┌───────────────┐   ┌──────────────────┐
//!             │ DocumentCache │◀──│ maintenance loop │
//!             │  LRU + TTL    │   │ sweep / optimize │
//!             └───────────────┘   └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rgc ingest ./docs                      # chunk, embed and index documents
//! rgc query "when did the band form" --context
//! rgc cache stats
//! rgc cache optimize
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, environment overrides, validation |
//! | [`embedding`] | Embedding providers (disabled, Ollama, OpenAI) |
//! | [`embedding_cache`] | Fingerprint-keyed embedding cache |
//! | [`document_cache`] | LRU + TTL cache, one file per entry |
//! | [`maintenance`] | Directory stats, cleanup, dedup + compaction |
//! | [`store`] | Flat-file and SQLite vector stores |
//! | [`retriever`] | Query → ranked passages → context block |
//! | [`ingest`] | Ingestion pipeline and filesystem loader |
//! | [`services`] | Component wiring and maintenance lifecycle |
//! | [`commands`] | `rgc` subcommands |
//!
//! The runtime-free pieces (data model, chunker, LRU index, provider and
//! store traits) live in `ragcache-core`.

pub mod commands;
pub mod config;
pub mod db;
pub mod document_cache;
pub mod embedding;
pub mod embedding_cache;
pub mod fs_util;
pub mod ingest;
pub mod maintenance;
pub mod retriever;
pub mod services;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use ragcache_core::{Error, Result};
