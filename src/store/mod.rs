//! Persistent [`VectorStore`] backends and the factory that picks one from
//! configuration.
//!
//! | `vector_store.backend` | Type | File under `vector_store.path` |
//! |------------------------|------|--------------------------------|
//! | `flat` (default) | [`FlatIndexStore`] | `index.flat` |
//! | `sqlite` | [`SqliteVectorStore`] | `vectors.sqlite` |
//!
//! The in-memory backend lives in `ragcache_core::store::memory`.

pub mod flat;
pub mod sqlite;

use std::sync::Arc;

use ragcache_core::store::VectorStore;
use ragcache_core::{Error, Result};

use crate::config::VectorStoreConfig;

pub use flat::FlatIndexStore;
pub use sqlite::SqliteVectorStore;

/// Open the configured backend for `dims`-dimensional vectors.
pub async fn open_store(config: &VectorStoreConfig, dims: usize) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "flat" => {
            let store = FlatIndexStore::open(config.path.join(flat::FLAT_INDEX_FILE), dims).await?;
            Ok(Arc::new(store))
        }
        "sqlite" => {
            let store =
                SqliteVectorStore::open(config.path.join(sqlite::SQLITE_INDEX_FILE), dims).await?;
            Ok(Arc::new(store))
        }
        other => Err(Error::configuration(format!(
            "Unknown vector store backend: '{}'. Must be flat or sqlite.",
            other
        ))),
    }
}
