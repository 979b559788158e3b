//! Core data models that flow through ingestion and retrieval.
//!
//! Metadata uses a closed, versioned schema: a fixed set of known fields,
//! a `properties` map restricted to scalars and lists of scalars, and an
//! `extra` bucket that keeps unknown fields written by newer versions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current [`Metadata`] schema version.
pub const METADATA_SCHEMA_VERSION: u32 = 1;

/// A scalar or list-of-scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<MetadataScalar>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataScalar {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Structured metadata attached to documents, chunks and vector records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, MetadataValue>,
    /// Fields this version does not know about, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_schema_version() -> u32 {
    METADATA_SCHEMA_VERSION
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            schema_version: METADATA_SCHEMA_VERSION,
            title: None,
            tags: Vec::new(),
            last_modified: None,
            properties: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl Metadata {
    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn property(&self, key: &str) -> Option<&MetadataValue> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.properties.insert(key.into(), value.into());
    }
}

/// A source document before chunking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    pub body: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: None,
            body: body.into(),
            metadata: Metadata::default(),
        }
    }
}

/// A bounded, overlapping slice of a [`SourceDocument`].
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    /// Zero-based, contiguous per source document.
    pub index: usize,
    pub source_document_id: String,
    pub source_url: Option<String>,
    pub metadata: Metadata,
}

impl Chunk {
    /// Deterministic record id used when the chunk enters a vector store.
    pub fn record_id(&self) -> String {
        format!("{}#{}", self.source_document_id, self.index)
    }
}

/// A (vector, text, metadata) triple owned by a vector store once added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, vector: Vec<f32>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vector,
            text: text.into(),
            metadata: Metadata::default(),
        }
    }

    /// Build the record for an embedded chunk. The chunk ordinal and source
    /// are folded into the record metadata so they survive the store.
    pub fn from_chunk(chunk: Chunk, vector: Vec<f32>) -> Self {
        let id = chunk.record_id();
        let mut metadata = chunk.metadata;
        metadata.set_property("chunk_index", chunk.index as i64);
        metadata.set_property("source_document_id", chunk.source_document_id);
        if let Some(url) = chunk.source_url {
            metadata.set_property("source_url", url);
        }
        Self {
            id,
            vector,
            text: chunk.text,
            metadata,
        }
    }
}

/// A retrieved passage.
///
/// `score` is the cosine similarity between the query vector and the stored
/// vector, in `[-1.0, 1.0]`; higher is more relevant. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPassage {
    pub record_id: String,
    pub text: String,
    pub metadata: Metadata,
    pub score: f32,
}
