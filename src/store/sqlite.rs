//! SQLite-backed vector store.
//!
//! Vectors are stored as little-endian `f32` blobs in `vector_records`;
//! the dimension the index was created with lives in `index_meta`. Search
//! loads every vector and ranks by cosine similarity in Rust, the same
//! brute-force approach as the flat index, so scores are identical across
//! backends.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ragcache_core::embedding::{blob_to_vec, vec_to_blob};
use ragcache_core::models::{Metadata, VectorRecord};
use ragcache_core::store::{check_dims, check_query, rank, DeleteSupport, SearchHit, VectorStore};
use ragcache_core::{Error, Result};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::db::{self, storage_err};

/// File name of the database inside the configured vector store directory.
pub const SQLITE_INDEX_FILE: &str = "vectors.sqlite";

pub struct SqliteVectorStore {
    pool: SqlitePool,
    path: PathBuf,
    dims: usize,
    /// Single writer per index.
    write_lock: Mutex<()>,
}

impl SqliteVectorStore {
    /// Open or create the database at `path` for `dims`-dimensional vectors.
    /// A database created for another dimension is a configuration error.
    pub async fn open(path: impl Into<PathBuf>, dims: usize) -> Result<Self> {
        let path = path.into();
        if dims == 0 {
            return Err(Error::configuration("vector index dims must be > 0"));
        }
        let pool = db::connect(&path).await?;
        db::run_migrations(&pool).await?;

        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'dims'")
                .fetch_optional(&pool)
                .await
                .map_err(storage_err)?;

        match stored {
            Some(value) => {
                let stored_dims: usize = value
                    .parse()
                    .map_err(|_| Error::storage(format!("invalid dims in index_meta: {}", value)))?;
                if stored_dims != dims {
                    return Err(Error::configuration(format!(
                        "vector index {} was built with {} dimensions but the embedding model produces {}; \
                         remove the index and re-ingest",
                        path.display(),
                        stored_dims,
                        dims
                    )));
                }
            }
            None => {
                sqlx::query("INSERT INTO index_meta (key, value) VALUES ('dims', ?)")
                    .bind(dims.to_string())
                    .execute(&pool)
                    .await
                    .map_err(storage_err)?;
            }
        }

        info!(path = %path.display(), dims, "sqlite vector store opened");
        Ok(Self {
            pool,
            path,
            dims,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn delete_support(&self) -> DeleteSupport {
        DeleteSupport::Native
    }

    async fn add(&self, records: Vec<VectorRecord>) -> Result<()> {
        check_dims(&records, self.dims)?;
        if records.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for record in &records {
            let metadata_json = serde_json::to_string(&record.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO vector_records (id, text, metadata_json, embedding)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&record.id)
            .bind(&record.text)
            .bind(&metadata_json)
            .bind(vec_to_blob(&record.vector))
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;
        debug!(count = records.len(), "sqlite vector records written");
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        check_query(query, self.dims)?;
        let rows = sqlx::query(
            "SELECT id, text, metadata_json, embedding FROM vector_records ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let records = rows
            .iter()
            .map(|row| -> Result<VectorRecord> {
                let blob: Vec<u8> = row.get("embedding");
                let metadata_json: String = row.get("metadata_json");
                let metadata: Metadata = serde_json::from_str(&metadata_json)?;
                Ok(VectorRecord {
                    id: row.get("id"),
                    vector: blob_to_vec(&blob),
                    text: row.get("text"),
                    metadata,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(rank(query, &records, k))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM vector_records WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn ids_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        // substr instead of LIKE: ids may contain `%` and `_`.
        sqlx::query_scalar("SELECT id FROM vector_records WHERE substr(id, 1, length(?)) = ?")
            .bind(prefix)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vector_records")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(count as usize)
    }
}
