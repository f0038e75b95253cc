//! Core document types for emberdb.
//!
//! A [`Document`] is a stored record with a client-supplied string id, text
//! content, a dense f32 embedding, and arbitrary key-value metadata.
//! [`MetadataValue`] is a JSON-typed sum used by the filter evaluator.
//! It uses the default externally-tagged serde representation for bincode
//! compatibility; the server API layer converts to/from untagged JSON at the
//! HTTP boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::DbError;

/// A typed metadata value attached to a document.
///
/// Covers the full JSON value space so that array operators
/// (`$arrContains`) and nested objects survive the round trip through the
/// binary row format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    /// JSON `null`.
    Null,
    /// Boolean value (`true` / `false`).
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating-point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list of values.
    Array(Vec<MetadataValue>),
    /// Nested key-value object.
    Object(HashMap<String, MetadataValue>),
}

impl From<serde_json::Value> for MetadataValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => MetadataValue::Null,
            serde_json::Value::Bool(b) => MetadataValue::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    MetadataValue::Integer(i)
                } else {
                    MetadataValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => MetadataValue::String(s),
            serde_json::Value::Array(items) => {
                MetadataValue::Array(items.into_iter().map(MetadataValue::from).collect())
            }
            serde_json::Value::Object(map) => MetadataValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, MetadataValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&MetadataValue> for serde_json::Value {
    fn from(value: &MetadataValue) -> Self {
        match value {
            MetadataValue::Null => serde_json::Value::Null,
            MetadataValue::Boolean(b) => serde_json::Value::Bool(*b),
            MetadataValue::Integer(i) => serde_json::json!(*i),
            MetadataValue::Float(f) => serde_json::json!(*f),
            MetadataValue::String(s) => serde_json::Value::String(s.clone()),
            MetadataValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            MetadataValue::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Document metadata: string keys mapped to JSON-typed values.
pub type Metadata = HashMap<String, MetadataValue>;

/// A stored document with content, unique id, and metadata.
///
/// The embedding is present in the persisted row only for array-of-structs
/// ingestion; struct-of-arrays ingestion leaves it empty because the vector
/// already lives in the collection's ANN index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Client-supplied identifier, unique within the collection.
    pub id: String,
    /// Opaque text content.
    pub content: String,
    /// Dense embedding; may be empty in persisted rows.
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Arbitrary key-value metadata for filtering.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Serializes the document to its binary row format.
    pub fn to_row(&self) -> Result<Vec<u8>, DbError> {
        bincode::serialize(self)
            .map_err(|e| DbError::Serialization(format!("failed to encode document {}: {e}", self.id)))
    }

    /// Decodes a document from its binary row format.
    pub fn from_row(bytes: &[u8]) -> Result<Self, DbError> {
        bincode::deserialize(bytes)
            .map_err(|e| DbError::Serialization(format!("failed to decode document row: {e}")))
    }
}

/// A batch of documents in struct-of-arrays form.
///
/// `embeddings` is a flat array laid out `[doc0..., doc1..., ...]`, the
/// layout the ANN index consumes directly — no per-document copies on the
/// ingest path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentBatch {
    pub ids: Vec<String>,
    pub contents: Vec<String>,
    pub embeddings: Vec<f32>,
    pub metadatas: Vec<Metadata>,
}

impl DocumentBatch {
    /// Number of documents in the batch.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when the batch holds no documents.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Embedding dimension implied by the flat array. Valid only after
    /// [`DocumentBatch::validate`] has passed.
    pub fn dimension(&self) -> usize {
        if self.ids.is_empty() {
            0
        } else {
            self.embeddings.len() / self.ids.len()
        }
    }

    /// Checks that all parallel arrays agree and the embedding layout is sound.
    pub fn validate(&self) -> Result<(), DbError> {
        let n = self.ids.len();
        if n == 0 {
            return Err(DbError::InvalidInput("ids array cannot be empty".into()));
        }
        if self.contents.len() != n {
            return Err(DbError::InvalidInput(format!(
                "length mismatch: ids={}, contents={}",
                n,
                self.contents.len()
            )));
        }
        if self.metadatas.len() != n {
            return Err(DbError::InvalidInput(format!(
                "length mismatch: ids={}, metadatas={}",
                n,
                self.metadatas.len()
            )));
        }
        if self.embeddings.is_empty() {
            return Err(DbError::InvalidInput(
                "embeddings array cannot be empty".into(),
            ));
        }
        if self.embeddings.len() % n != 0 {
            return Err(DbError::InvalidInput(format!(
                "embeddings length ({}) must be divisible by number of documents ({})",
                self.embeddings.len(),
                n
            )));
        }
        Ok(())
    }
}
