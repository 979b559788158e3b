//! Flat (brute-force) vector index persisted as a single file.
//!
//! # File layout
//!
//! ```text
//! magic            8 bytes   "RGCFLAT\0"
//! format_version   u32 LE
//! dims             u32 LE
//! count            u64 LE
//! vectors          count × dims × f32 LE
//! side_table_len   u64 LE
//! side_table       JSON array, position i → {"id", "text", "metadata"}
//! ```
//!
//! The whole file is rewritten atomically after every mutation. Deletion is
//! rebuild-on-delete: the record is dropped and the index rewritten.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ragcache_core::embedding::{blob_to_vec, vec_to_blob};
use ragcache_core::models::{Metadata, VectorRecord};
use ragcache_core::store::{check_dims, check_query, rank, upsert, DeleteSupport, SearchHit, VectorStore};
use ragcache_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::fs_util::write_atomic;

const MAGIC: &[u8; 8] = b"RGCFLAT\0";
pub const FLAT_FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 4 + 8;

/// File name of the index inside the configured vector store directory.
pub const FLAT_INDEX_FILE: &str = "index.flat";

#[derive(Debug, Serialize, Deserialize)]
struct SideEntry {
    id: String,
    text: String,
    #[serde(default)]
    metadata: Metadata,
}

pub struct FlatIndexStore {
    path: PathBuf,
    dims: usize,
    /// Writers hold the write guard across mutate + encode + write.
    records: RwLock<Vec<VectorRecord>>,
}

impl FlatIndexStore {
    /// Load the index at `path`, or start an empty one for `dims`.
    ///
    /// An existing index built for a different dimension is a
    /// [`Error::Configuration`]: searching it with the current model's
    /// vectors would be meaningless.
    pub async fn open(path: impl Into<PathBuf>, dims: usize) -> Result<Self> {
        let path = path.into();
        if dims == 0 {
            return Err(Error::configuration("vector index dims must be > 0"));
        }

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let (stored_dims, records) = decode(&bytes)?;
                if stored_dims != dims {
                    return Err(Error::configuration(format!(
                        "vector index {} was built with {} dimensions but the embedding model produces {}; \
                         remove the index and re-ingest",
                        path.display(),
                        stored_dims,
                        dims
                    )));
                }
                records
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), records = records.len(), dims, "flat index loaded");
        Ok(Self {
            path,
            dims,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, records: &[VectorRecord]) -> Result<()> {
        let bytes = encode(self.dims, records)?;
        write_atomic(&self.path, &bytes).await?;
        debug!(path = %self.path.display(), records = records.len(), "flat index saved");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for FlatIndexStore {
    fn backend(&self) -> &'static str {
        "flat"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn delete_support(&self) -> DeleteSupport {
        DeleteSupport::Rebuild
    }

    async fn add(&self, records: Vec<VectorRecord>) -> Result<()> {
        check_dims(&records, self.dims)?;
        if records.is_empty() {
            return Ok(());
        }
        let mut guard = self.records.write().await;
        let previous = guard.clone();
        upsert(&mut guard, records);
        if let Err(e) = self.save(&guard).await {
            *guard = previous;
            return Err(e);
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        check_query(query, self.dims)?;
        let guard = self.records.read().await;
        Ok(rank(query, guard.iter(), k))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut guard = self.records.write().await;
        let Some(position) = guard.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        let removed = guard.remove(position);
        if let Err(e) = self.save(&guard).await {
            guard.insert(position, removed);
            return Err(e);
        }
        Ok(true)
    }

    async fn ids_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let guard = self.records.read().await;
        Ok(guard
            .iter()
            .filter(|r| r.id.starts_with(prefix))
            .map(|r| r.id.clone())
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

fn encode(dims: usize, records: &[VectorRecord]) -> Result<Vec<u8>> {
    let side: Vec<SideEntry> = records
        .iter()
        .map(|r| SideEntry {
            id: r.id.clone(),
            text: r.text.clone(),
            metadata: r.metadata.clone(),
        })
        .collect();
    let side_json = serde_json::to_vec(&side)?;

    let mut out = Vec::with_capacity(HEADER_LEN + records.len() * dims * 4 + 8 + side_json.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FLAT_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(dims as u32).to_le_bytes());
    out.extend_from_slice(&(records.len() as u64).to_le_bytes());
    for record in records {
        out.extend_from_slice(&vec_to_blob(&record.vector));
    }
    out.extend_from_slice(&(side_json.len() as u64).to_le_bytes());
    out.extend_from_slice(&side_json);
    Ok(out)
}

fn malformed(reason: impl std::fmt::Display) -> Error {
    Error::storage(format!("malformed flat index: {}", reason))
}

/// Read `N` bytes at `*pos`, advancing it.
fn take<'a>(bytes: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(n)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| malformed("unexpected end of file"))?;
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    let raw = take(bytes, pos, 4)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_u64(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let raw = take(bytes, pos, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Ok(u64::from_le_bytes(buf))
}

fn decode(bytes: &[u8]) -> Result<(usize, Vec<VectorRecord>)> {
    let mut pos = 0;
    if take(bytes, &mut pos, MAGIC.len())? != MAGIC {
        return Err(malformed("bad magic"));
    }
    let version = read_u32(bytes, &mut pos)?;
    if version != FLAT_FORMAT_VERSION {
        return Err(malformed(format!("unsupported format version {}", version)));
    }
    let dims = read_u32(bytes, &mut pos)? as usize;
    let count = usize::try_from(read_u64(bytes, &mut pos)?).map_err(malformed)?;

    let block_len = count
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| malformed("vector block too large"))?;
    let block = take(bytes, &mut pos, block_len)?;

    let side_len = usize::try_from(read_u64(bytes, &mut pos)?).map_err(malformed)?;
    let side: Vec<SideEntry> =
        serde_json::from_slice(take(bytes, &mut pos, side_len)?).map_err(malformed)?;
    if side.len() != count {
        return Err(malformed(format!(
            "{} vectors but {} side table entries",
            count,
            side.len()
        )));
    }

    let records = side
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let start = i * dims * 4;
            VectorRecord {
                id: entry.id,
                vector: blob_to_vec(&block[start..start + dims * 4]),
                text: entry.text,
                metadata: entry.metadata,
            }
        })
        .collect();
    Ok((dims, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        let mut r = VectorRecord::new(id, vector, format!("text of {}", id));
        r.metadata = Metadata::with_title(format!("Title {}", id));
        r.metadata.set_property("chunk_index", 3i64);
        r
    }

    #[tokio::test]
    async fn test_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(FLAT_INDEX_FILE);
        let records = vec![
            record("a#0", vec![1.0, 0.0, -0.25]),
            record("a#1", vec![0.0, 1.0, 0.125]),
        ];
        {
            let store = FlatIndexStore::open(&path, 3).await.unwrap();
            store.add(records.clone()).await.unwrap();
        }

        let store = FlatIndexStore::open(&path, 3).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(*store.records.read().await, records);
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let tmp = TempDir::new().unwrap();
        let store = FlatIndexStore::open(tmp.path().join(FLAT_INDEX_FILE), 2)
            .await
            .unwrap();
        assert!(store.search(&[1.0, 0.0], 3).await.unwrap().is_empty());

        store
            .add(vec![
                record("x", vec![0.0, 1.0]),
                record("y", vec![1.0, 0.0]),
                record("z", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();
        let hits = store.search(&[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec!["y", "z"]);
        assert!(hits[0].score <= 1.0 && hits[1].score >= -1.0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_on_open_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(FLAT_INDEX_FILE);
        FlatIndexStore::open(&path, 2)
            .await
            .unwrap()
            .add(vec![record("a", vec![1.0, 0.0])])
            .await
            .unwrap();

        let err = FlatIndexStore::open(&path, 3).await.err().unwrap();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_add_wrong_dimension_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = FlatIndexStore::open(tmp.path().join(FLAT_INDEX_FILE), 2)
            .await
            .unwrap();
        let err = store.add(vec![record("a", vec![1.0])]).await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, actual: 1 }));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_delete_rebuilds_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(FLAT_INDEX_FILE);
        let store = FlatIndexStore::open(&path, 1).await.unwrap();
        assert_eq!(store.delete_support(), DeleteSupport::Rebuild);
        store
            .add(vec![record("a", vec![1.0]), record("b", vec![-1.0])])
            .await
            .unwrap();

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());

        let reopened = FlatIndexStore::open(&path, 1).await.unwrap();
        let hits = reopened.search(&[1.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "b");
    }

    #[tokio::test]
    async fn test_ids_with_prefix_after_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(FLAT_INDEX_FILE);
        {
            let store = FlatIndexStore::open(&path, 1).await.unwrap();
            store
                .add(vec![
                    record("gig.md#0", vec![1.0]),
                    record("gig.md#1", vec![1.0]),
                    record("rider.md#0", vec![1.0]),
                ])
                .await
                .unwrap();
        }
        let store = FlatIndexStore::open(&path, 1).await.unwrap();
        let mut ids = store.ids_with_prefix("gig.md#").await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["gig.md#0", "gig.md#1"]);
    }

    #[tokio::test]
    async fn test_write_failure_rolls_back() {
        let tmp = TempDir::new().unwrap();
        // The index path is a directory, so the rename onto it fails.
        let path = tmp.path().join("occupied");
        std::fs::create_dir_all(path.join("child")).unwrap();
        let store = FlatIndexStore {
            path: path.clone(),
            dims: 1,
            records: RwLock::new(Vec::new()),
        };

        assert!(store.add(vec![record("a", vec![1.0])]).await.is_err());
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_storage_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(FLAT_INDEX_FILE);
        std::fs::write(&path, b"not an index").unwrap();
        let err = FlatIndexStore::open(&path, 2).await.err().unwrap();
        assert!(matches!(err, Error::Storage { .. }));

        let mut bytes = encode(2, &[record("a", vec![1.0, 2.0])]).unwrap();
        bytes.truncate(bytes.len() - 5);
        std::fs::write(&path, bytes).unwrap();
        let err = FlatIndexStore::open(&path, 2).await.err().unwrap();
        assert!(matches!(err, Error::Storage { .. }));
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode(4, &[]).unwrap();
        assert_eq!(&bytes[..8], MAGIC);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 4);
        assert_eq!(u64::from_le_bytes(bytes[16..24].try_into().unwrap()), 0);
    }
}
