//! Request and response data transfer objects for the REST API.
//!
//! All types derive `Serialize` and/or `Deserialize` for JSON marshalling
//! via Axum. Metadata crosses the boundary as untagged JSON objects and is
//! converted to the core's typed [`MetadataValue`] representation here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use emberdb_core::catalog::{CollectionRecord, CollectionStats, DatabaseInfo};
use emberdb_core::{Document, DocumentBatch, Metadata, MetadataValue, QueryHit};

use crate::api::errors::ApiError;

/// Convert JSON metadata (from API requests) to core metadata.
pub fn json_to_metadata(map: HashMap<String, serde_json::Value>) -> Metadata {
    map.into_iter()
        .map(|(k, v)| (k, MetadataValue::from(v)))
        .collect()
}

/// Convert core metadata to JSON (for API responses).
pub fn metadata_to_json(map: &Metadata) -> HashMap<String, serde_json::Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
        .collect()
}

/// Request body for `POST /api/v1/database`. The body may be omitted
/// entirely; the database name defaults to `default`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateDatabaseRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// Request body for `POST /api/v1/database/:db/collections`.
#[derive(Debug, Deserialize)]
pub struct CreateCollectionRequest {
    pub name: String,
}

/// Generic success message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Response body for `GET /api/v1/databases`.
#[derive(Debug, Serialize)]
pub struct ListDatabasesResponse {
    pub databases: Vec<DatabaseInfo>,
}

/// A document in API responses. Embeddings are never echoed back.
#[derive(Debug, Serialize)]
pub struct DocumentView {
    pub id: String,
    pub content: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl From<&Document> for DocumentView {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            content: doc.content.clone(),
            metadata: metadata_to_json(&doc.metadata),
        }
    }
}

/// Response body for `GET /api/v1/database/:db/collections/:coll`.
#[derive(Debug, Serialize)]
pub struct GetCollectionResponse {
    pub collection: CollectionRecord,
    pub documents: Vec<DocumentView>,
    pub stats: CollectionStats,
}

/// Request body for `POST .../documents`: a struct-of-arrays batch with one
/// embedding row per document.
#[derive(Debug, Deserialize)]
pub struct InsertDocumentsRequest {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    pub metadatas: Option<Vec<HashMap<String, serde_json::Value>>>,
}

impl InsertDocumentsRequest {
    /// Flattens the nested embedding rows into the core batch layout,
    /// rejecting ragged input that flattening would otherwise mask.
    pub fn into_batch(self) -> Result<DocumentBatch, ApiError> {
        if self.embeddings.len() != self.ids.len() {
            return Err(ApiError::BadRequest(format!(
                "length mismatch: ids={}, embeddings={}",
                self.ids.len(),
                self.embeddings.len()
            )));
        }
        let dim = self.embeddings.first().map(Vec::len).unwrap_or(0);
        for (i, row) in self.embeddings.iter().enumerate() {
            if row.len() != dim {
                return Err(ApiError::BadRequest(format!(
                    "embedding {} has dimension {}, expected {}",
                    i,
                    row.len(),
                    dim
                )));
            }
        }

        let n = self.ids.len();
        let metadatas = match self.metadatas {
            Some(metadatas) => {
                if metadatas.len() != n {
                    return Err(ApiError::BadRequest(format!(
                        "length mismatch: ids={}, metadatas={}",
                        n,
                        metadatas.len()
                    )));
                }
                metadatas.into_iter().map(json_to_metadata).collect()
            }
            None => vec![Metadata::new(); n],
        };

        Ok(DocumentBatch {
            ids: self.ids,
            contents: self.documents,
            embeddings: self.embeddings.into_iter().flatten().collect(),
            metadatas,
        })
    }
}

/// Response body for document insertion.
#[derive(Debug, Serialize)]
pub struct InsertDocumentsResponse {
    pub message: String,
    pub inserted: usize,
}

/// Request body for `PUT .../documents`: shallow metadata merge by id.
#[derive(Debug, Deserialize)]
pub struct UpdateDocumentsRequest {
    pub document_id: String,
    #[serde(default)]
    pub updates: HashMap<String, serde_json::Value>,
}

/// Request body for `DELETE .../documents`.
#[derive(Debug, Deserialize)]
pub struct DeleteDocumentsRequest {
    pub ids: Vec<String>,
}

/// Response body for document deletion.
#[derive(Debug, Serialize)]
pub struct DeleteDocumentsResponse {
    pub message: String,
    pub deleted: usize,
}

/// Request body for `POST .../documents/query`.
#[derive(Debug, Deserialize)]
pub struct QueryDocumentsRequest {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    pub query_embedding: Vec<f32>,
    #[serde(default)]
    pub max_distance: f32,
    #[serde(rename = "where", default)]
    pub filter: Option<serde_json::Map<String, serde_json::Value>>,
}

fn default_top_k() -> usize {
    10
}

/// One ranked query result.
#[derive(Debug, Serialize)]
pub struct QueryHitView {
    pub id: String,
    pub content: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub distance: f32,
}

impl From<&QueryHit> for QueryHitView {
    fn from(hit: &QueryHit) -> Self {
        Self {
            id: hit.document.id.clone(),
            content: hit.document.content.clone(),
            metadata: metadata_to_json(&hit.document.metadata),
            distance: hit.distance,
        }
    }
}

/// Response body for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub database_count: usize,
    pub collection_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(ids: &[&str], rows: Vec<Vec<f32>>) -> InsertDocumentsRequest {
        InsertDocumentsRequest {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            documents: ids.iter().map(|s| s.to_string()).collect(),
            embeddings: rows,
            metadatas: None,
        }
    }

    #[test]
    fn into_batch_flattens_uniform_rows() {
        let batch = request(&["a", "b"], vec![vec![1.0, 2.0], vec![3.0, 4.0]])
            .into_batch()
            .unwrap();
        assert_eq!(batch.embeddings, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(batch.dimension(), 2);
        assert_eq!(batch.metadatas.len(), 2);
    }

    #[test]
    fn into_batch_rejects_ragged_rows() {
        // 1 + 3 values over 2 docs would flatten to a divisible layout; the
        // boundary check must catch it anyway.
        let err = request(&["a", "b"], vec![vec![1.0], vec![2.0, 3.0, 4.0]])
            .into_batch()
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn into_batch_rejects_row_count_mismatch() {
        let err = request(&["a", "b"], vec![vec![1.0, 2.0]]).into_batch().unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn into_batch_rejects_metadata_count_mismatch() {
        let mut req = request(&["a", "b"], vec![vec![1.0], vec![2.0]]);
        req.metadatas = Some(vec![HashMap::new()]);
        assert!(matches!(req.into_batch(), Err(ApiError::BadRequest(_))));
    }
}
