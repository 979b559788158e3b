//! # ragcache core
//!
//! Runtime-free logic shared by the `ragcache` application: the data model,
//! content fingerprinting, the recency index behind the document cache, the
//! overlapping-window chunker, and the embedding-provider and vector-store
//! traits with an in-memory store.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Everything that
//! touches disk or the network lives in the application crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod lru;
pub mod models;
pub mod store;

pub use error::{Error, Result};
pub use fingerprint::{fingerprint, Fingerprint};
