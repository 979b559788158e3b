//! Vector store abstraction.
//!
//! The [`VectorStore`] trait covers everything the retriever and the
//! ingestion path need from a similarity index, so backends (in-memory,
//! flat index file, SQLite) are interchangeable behind an `Arc<dyn VectorStore>`.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Scores
//!
//! Every backend scores hits by cosine similarity in `[-1.0, 1.0]` and
//! returns them in descending order, so callers never need to know which
//! backend produced a result.
//!
//! # Deletion
//!
//! Not every index can remove a vector in place. Each backend reports its
//! capability through [`VectorStore::delete_support`]; callers must not rely
//! on deletion for correctness unless the backend says it is real.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::VectorRecord;

/// How a backend honours [`VectorStore::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteSupport {
    /// The record is removed in place.
    Native,
    /// The record is removed by rebuilding and rewriting the whole index.
    Rebuild,
    /// `delete` is a documented no-op that always returns `false`.
    Unsupported,
}

/// A record returned from [`VectorStore::search`] with its similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: VectorRecord,
    pub score: f32,
}

/// Abstract similarity index over (vector, text, metadata) records.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](VectorStore::add) | Append records and make them durable |
/// | [`search`](VectorStore::search) | Top-k by cosine similarity |
/// | [`delete`](VectorStore::delete) | Remove a record, per [`DeleteSupport`] |
/// | [`ids_with_prefix`](VectorStore::ids_with_prefix) | Enumerate a document's records |
/// | [`len`](VectorStore::len) | Number of stored records |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs (`"memory"`, `"flat"`, `"sqlite"`).
    fn backend(&self) -> &'static str;

    /// Dimension every stored vector must have.
    fn dims(&self) -> usize;

    fn delete_support(&self) -> DeleteSupport;

    /// Append records, replacing any stored record with the same id. Safe to
    /// call incrementally; persistent backends have made the records durable
    /// by the time this returns `Ok`. A record with the wrong dimension
    /// rejects the whole call.
    async fn add(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Up to `k` records ordered by descending similarity. An empty store
    /// yields an empty vec, never an error.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Remove a record by id. Returns whether a record was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Ids of every stored record starting with `prefix`, in no particular
    /// order. Used to find a document's chunk records.
    async fn ids_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Reject a batch if any vector does not have `dims` components.
pub fn check_dims(records: &[VectorRecord], dims: usize) -> Result<()> {
    match records.iter().find(|r| r.vector.len() != dims) {
        Some(bad) => Err(Error::DimensionMismatch {
            expected: dims,
            actual: bad.vector.len(),
        }),
        None => Ok(()),
    }
}

/// Reject a query vector that does not have `dims` components.
pub fn check_query(query: &[f32], dims: usize) -> Result<()> {
    if query.len() != dims {
        return Err(Error::DimensionMismatch {
            expected: dims,
            actual: query.len(),
        });
    }
    Ok(())
}

/// Merge `incoming` into `records`: same id replaces in place, new ids append.
pub fn upsert(records: &mut Vec<VectorRecord>, incoming: Vec<VectorRecord>) {
    let mut positions: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i))
        .collect();
    for record in incoming {
        match positions.get(&record.id) {
            Some(&i) => records[i] = record,
            None => {
                positions.insert(record.id.clone(), records.len());
                records.push(record);
            }
        }
    }
}

/// Score `records` against `query` and keep the best `k`, highest first.
///
/// Ties keep insertion order so results are deterministic.
pub fn rank<'a, I>(query: &[f32], records: I, k: usize) -> Vec<SearchHit>
where
    I: IntoIterator<Item = &'a VectorRecord>,
{
    if k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(f32, &VectorRecord)> = records
        .into_iter()
        .map(|r| (cosine_similarity(query, &r.vector), r))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
        .into_iter()
        .map(|(score, record)| SearchHit {
            record: record.clone(),
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_orders_and_truncates() {
        let records = vec![
            VectorRecord::new("far", vec![0.0, 1.0], "far"),
            VectorRecord::new("near", vec![1.0, 0.1], "near"),
            VectorRecord::new("exact", vec![1.0, 0.0], "exact"),
        ];
        let hits = rank(&[1.0, 0.0], &records, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, "exact");
        assert_eq!(hits[1].record.id, "near");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let mut records = vec![
            VectorRecord::new("a", vec![1.0], "old a"),
            VectorRecord::new("b", vec![1.0], "b"),
        ];
        upsert(
            &mut records,
            vec![
                VectorRecord::new("a", vec![0.5], "new a"),
                VectorRecord::new("c", vec![1.0], "c"),
            ],
        );
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(records[0].text, "new a");
    }

    #[test]
    fn test_upsert_repeated_id_in_one_batch_keeps_last() {
        let mut records = vec![VectorRecord::new("a", vec![1.0], "a")];
        upsert(
            &mut records,
            vec![
                VectorRecord::new("d", vec![1.0], "first d"),
                VectorRecord::new("d", vec![1.0], "second d"),
            ],
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].text, "second d");
    }

    #[test]
    fn test_check_query() {
        assert!(check_query(&[1.0, 2.0], 2).is_ok());
        assert!(matches!(
            check_query(&[1.0], 2),
            Err(Error::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_rank_zero_k() {
        let records = vec![VectorRecord::new("a", vec![1.0], "a")];
        assert!(rank(&[1.0], &records, 0).is_empty());
    }

    #[test]
    fn test_check_dims() {
        let records = vec![
            VectorRecord::new("a", vec![1.0, 2.0], "a"),
            VectorRecord::new("b", vec![1.0], "b"),
        ];
        let err = check_dims(&records, 2).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert!(check_dims(&records[..1], 2).is_ok());
    }
}
