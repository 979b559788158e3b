//! In-memory [`VectorStore`] implementation for tests and embedding.
//!
//! Uses a `Vec` behind `std::sync::RwLock`. Search is brute-force cosine
//! similarity over all stored vectors; delete is native.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::VectorRecord;

use super::{check_dims, check_query, rank, upsert, DeleteSupport, SearchHit, VectorStore};

/// Non-persistent store. Nothing survives the process.
pub struct InMemoryVectorStore {
    dims: usize,
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            records: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn delete_support(&self) -> DeleteSupport {
        DeleteSupport::Native
    }

    async fn add(&self, records: Vec<VectorRecord>) -> Result<()> {
        check_dims(&records, self.dims)?;
        upsert(&mut self.records.write().unwrap(), records);
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        check_query(query, self.dims)?;
        let records = self.records.read().unwrap();
        Ok(rank(query, records.iter(), k))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write().unwrap();
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }

    async fn ids_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let records = self.records.read().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.id.starts_with(prefix))
            .map(|r| r.id.clone())
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.read().unwrap().len())
    }
}
