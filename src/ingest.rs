//! Ingestion pipeline: document → chunks → cached embeddings → vector store.
//!
//! When a [`DocumentCache`] is attached, the raw body of every ingested
//! document is cached under its id and re-ingesting an unchanged body is a
//! no-op. A changed document that now produces fewer chunks has its stale
//! trailing chunk records deleted (on backends that support deletion). The
//! stale ids come from the vector store, so an expired or evicted cache
//! entry only costs a redundant re-embed.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ragcache_core::chunk::Chunker;
use ragcache_core::models::{Metadata, SourceDocument, VectorRecord};
use ragcache_core::store::VectorStore;
use ragcache_core::{fingerprint, Error, Result};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::document_cache::DocumentCache;
use crate::embedding_cache::EmbeddingCache;

/// Source tag recorded on document cache entries written by ingestion.
const INGEST_SOURCE: &str = "ingest";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub skipped_unchanged: usize,
    pub stale_removed: usize,
}

impl IngestReport {
    fn merge(&mut self, other: IngestReport) {
        self.documents += other.documents;
        self.chunks += other.chunks;
        self.skipped_unchanged += other.skipped_unchanged;
        self.stale_removed += other.stale_removed;
    }
}

pub struct Ingestor {
    chunker: Chunker,
    embeddings: Arc<EmbeddingCache>,
    store: Arc<dyn VectorStore>,
    documents: Option<Arc<DocumentCache>>,
}

impl Ingestor {
    pub fn new(chunker: Chunker, embeddings: Arc<EmbeddingCache>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            chunker,
            embeddings,
            store,
            documents: None,
        }
    }

    pub fn with_document_cache(mut self, documents: Arc<DocumentCache>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub async fn ingest(&self, document: &SourceDocument) -> Result<IngestReport> {
        let body_hash = fingerprint(&document.body).to_string();
        let previous = match &self.documents {
            Some(cache) => cache.get(&document.id).await?,
            None => None,
        };
        if previous
            .as_ref()
            .is_some_and(|entry| entry.metadata.content_hash == body_hash)
        {
            debug!(document = %document.id, "document unchanged, skipping");
            return Ok(IngestReport {
                documents: 1,
                skipped_unchanged: 1,
                ..Default::default()
            });
        }

        let chunks = self.chunker.chunk(document);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embeddings.embed(&texts).await?;
        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord::from_chunk(chunk, vector))
            .collect();
        let chunk_count = records.len();
        let first_record = records.first().map(|r| r.id.clone());
        self.store.add(records).await?;

        let mut stale_removed = 0;
        let prefix = format!("{}#", document.id);
        let existing = self.store.ids_with_prefix(&prefix).await?;
        for id in stale_chunk_ids(&existing, &document.id, chunk_count) {
            if self.store.delete(&id).await? {
                stale_removed += 1;
            }
        }

        if let Some(cache) = &self.documents {
            cache
                .put(&document.id, document.body.as_str(), INGEST_SOURCE, None)
                .await?;
            if let Some(record_id) = first_record {
                cache.set_embedding_id(&document.id, &record_id).await?;
            }
        }

        debug!(
            document = %document.id,
            chunks = chunk_count,
            stale_removed,
            "document ingested"
        );
        Ok(IngestReport {
            documents: 1,
            chunks: chunk_count,
            skipped_unchanged: 0,
            stale_removed,
        })
    }

    /// Ingest documents in order, stopping at the first error.
    pub async fn ingest_all(&self, documents: &[SourceDocument]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for document in documents {
            report.merge(self.ingest(document).await?);
        }
        info!(
            documents = report.documents,
            chunks = report.chunks,
            skipped = report.skipped_unchanged,
            backend = self.store.backend(),
            "ingestion finished"
        );
        Ok(report)
    }
}

/// Chunk record ids of `document_id` with an index of `keep` or more.
/// Ids that merely share the prefix (another document named `"{id}#..."`)
/// are left alone.
fn stale_chunk_ids(ids: &[String], document_id: &str, keep: usize) -> Vec<String> {
    ids.iter()
        .filter(|id| {
            id.strip_prefix(document_id)
                .and_then(|rest| rest.strip_prefix('#'))
                .filter(|index| index.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|index| index.parse::<usize>().ok())
                .is_some_and(|index| index >= keep)
        })
        .cloned()
        .collect()
}

/// Load every UTF-8 file under `root` whose relative path matches one of
/// `include_globs`. Symlinks are not followed. Document ids are the
/// relative paths, sorted.
pub fn load_documents(root: &Path, include_globs: &[String]) -> Result<Vec<SourceDocument>> {
    if !root.exists() {
        return Err(Error::configuration(format!(
            "Ingest root does not exist: {}",
            root.display()
        )));
    }

    let include_set = build_globset(include_globs)?;
    let exclude_set = build_globset(&[
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ])?;

    let mut documents = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match file_to_document(path, &rel_str) {
            Ok(Some(doc)) => documents.push(doc),
            Ok(None) => warn!(path = %path.display(), "skipping non UTF-8 file"),
            Err(e) => return Err(e),
        }
    }

    // Sort for deterministic ordering
    documents.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(documents)
}

fn file_to_document(path: &Path, relative_path: &str) -> Result<Option<SourceDocument>> {
    let bytes = std::fs::read(path)?;
    let Ok(body) = String::from_utf8(bytes) else {
        return Ok(None);
    };

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut metadata = Metadata::with_title(title);
    metadata.last_modified = std::fs::metadata(path)?
        .modified()
        .ok()
        .map(DateTime::<Utc>::from);

    let mut document = SourceDocument::new(relative_path, body);
    document.url = Some(format!("file://{}", path.display()));
    document.metadata = metadata;
    Ok(Some(document))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::configuration(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::configuration(format!("invalid glob set: {}", e)))
}
