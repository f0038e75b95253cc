//! HTTP request handlers and shared application state.
//!
//! Handlers deserialize DTOs, offload the blocking service call to the
//! runtime's blocking pool, and translate [`DbError`] kinds into HTTP
//! statuses via [`ApiError`].

use axum::extract::{Path, State};
use axum::Json;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;

use emberdb_core::{config, DbService, DocumentUpdate, QueryRequest};

use crate::api::errors::ApiError;
use crate::api::metrics;
use crate::api::models::*;

/// Shared application state passed to every handler via Axum's `State`
/// extractor.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DbService>,
    pub prometheus_handle: PrometheusHandle,
    pub start_time: Instant,
}

/// Rejects names that are empty, too long, or contain characters unsafe for
/// table URIs and index file paths.
fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() || name.len() > config::MAX_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "Name must be 1-{} characters",
            config::MAX_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ApiError::BadRequest(
            "Name must contain only alphanumeric characters, '_', or '-'".into(),
        ));
    }
    Ok(())
}

/// Runs a blocking service call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, emberdb_core::DbError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("task join error: {e}")))?
        .map_err(ApiError::from)
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let service = Arc::clone(&state.service);
    let databases = blocking(move || service.list_databases()).await?;
    let collection_count = databases.iter().map(|db| db.collection_count).sum();

    Ok(Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        database_count: databases.len(),
        collection_count,
    }))
}

/// `GET /metrics`
pub async fn metrics_endpoint(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// `POST /api/v1/database`
pub async fn create_database(
    State(state): State<AppState>,
    body: Result<Json<CreateDatabaseRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    // The body is optional; an absent or empty name falls back to "default".
    let name = body
        .ok()
        .and_then(|Json(req)| req.name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "default".to_string());
    validate_name(&name)?;

    let service = Arc::clone(&state.service);
    {
        let name = name.clone();
        blocking(move || service.create_database(&name)).await?;
    }
    metrics::record_write_operation(&name, "create_database");
    Ok(Json(MessageResponse {
        message: "Database created successfully".into(),
    }))
}

/// `GET /api/v1/databases`
pub async fn list_databases(
    State(state): State<AppState>,
) -> Result<Json<ListDatabasesResponse>, ApiError> {
    let service = Arc::clone(&state.service);
    let databases = blocking(move || service.list_databases()).await?;
    Ok(Json(ListDatabasesResponse { databases }))
}

/// `DELETE /api/v1/database/:db`
pub async fn delete_database(
    State(state): State<AppState>,
    Path(db): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let service = Arc::clone(&state.service);
    {
        let db = db.clone();
        blocking(move || service.delete_database(&db)).await?;
    }
    metrics::record_write_operation(&db, "delete_database");
    Ok(Json(MessageResponse {
        message: "Database deleted successfully".into(),
    }))
}

/// `POST /api/v1/database/:db/collections`
pub async fn create_collection(
    State(state): State<AppState>,
    Path(db): Path<String>,
    Json(req): Json<CreateCollectionRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    validate_name(&req.name)?;
    let service = Arc::clone(&state.service);
    {
        let db = db.clone();
        let name = req.name.clone();
        blocking(move || service.create_collection(&db, &name)).await?;
    }
    metrics::record_write_operation(&req.name, "create_collection");
    Ok(Json(MessageResponse {
        message: "Collection created successfully".into(),
    }))
}

/// `GET /api/v1/database/:db/collections`
pub async fn list_collections(
    State(state): State<AppState>,
    Path(db): Path<String>,
) -> Result<Json<Vec<emberdb_core::CollectionRecord>>, ApiError> {
    let service = Arc::clone(&state.service);
    let collections = blocking(move || service.list_collections(&db)).await?;
    Ok(Json(collections))
}

/// `GET /api/v1/database/:db/collections/:coll`
pub async fn get_collection(
    State(state): State<AppState>,
    Path((db, coll)): Path<(String, String)>,
) -> Result<Json<GetCollectionResponse>, ApiError> {
    let service = Arc::clone(&state.service);
    let entry = blocking(move || service.get_collection(&db, &coll)).await?;
    Ok(Json(GetCollectionResponse {
        collection: entry.record,
        documents: Vec::new(),
        stats: entry.stats,
    }))
}

/// `DELETE /api/v1/database/:db/collections/:coll`
pub async fn delete_collection(
    State(state): State<AppState>,
    Path((db, coll)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let service = Arc::clone(&state.service);
    {
        let coll = coll.clone();
        blocking(move || service.delete_collection(&db, &coll)).await?;
    }
    metrics::record_write_operation(&coll, "delete_collection");
    Ok(Json(MessageResponse {
        message: "Collection deleted successfully".into(),
    }))
}

/// `POST /api/v1/database/:db/collections/:coll/documents`
pub async fn insert_documents(
    State(state): State<AppState>,
    Path((db, coll)): Path<(String, String)>,
    Json(req): Json<InsertDocumentsRequest>,
) -> Result<Json<InsertDocumentsResponse>, ApiError> {
    let batch = req.into_batch()?;
    if batch.dimension() > config::MAX_DIMENSION {
        return Err(ApiError::BadRequest(format!(
            "Embedding dimension must be at most {}",
            config::MAX_DIMENSION
        )));
    }
    let inserted = batch.len();

    let service = Arc::clone(&state.service);
    {
        let coll = coll.clone();
        blocking(move || service.insert_document_batch(&db, &coll, batch)).await?;
    }
    metrics::record_write_operation(&coll, "insert");
    Ok(Json(InsertDocumentsResponse {
        message: "Documents inserted into collection successfully".into(),
        inserted,
    }))
}

/// `GET /api/v1/database/:db/collections/:coll/documents`
pub async fn get_documents(
    State(state): State<AppState>,
    Path((db, coll)): Path<(String, String)>,
) -> Result<Json<Vec<DocumentView>>, ApiError> {
    let service = Arc::clone(&state.service);
    let documents = blocking(move || service.get_documents(&db, &coll)).await?;
    Ok(Json(documents.iter().map(DocumentView::from).collect()))
}

/// `PUT /api/v1/database/:db/collections/:coll/documents`
pub async fn update_documents(
    State(state): State<AppState>,
    Path((db, coll)): Path<(String, String)>,
    Json(req): Json<UpdateDocumentsRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let update = DocumentUpdate {
        document_id: req.document_id,
        updates: json_to_metadata(req.updates),
    };

    let service = Arc::clone(&state.service);
    {
        let coll = coll.clone();
        blocking(move || service.update_document(&db, &coll, update)).await?;
    }
    metrics::record_write_operation(&coll, "update");
    Ok(Json(MessageResponse {
        message: "Document updated successfully".into(),
    }))
}

/// `DELETE /api/v1/database/:db/collections/:coll/documents`
pub async fn delete_documents(
    State(state): State<AppState>,
    Path((db, coll)): Path<(String, String)>,
    Json(req): Json<DeleteDocumentsRequest>,
) -> Result<Json<DeleteDocumentsResponse>, ApiError> {
    let service = Arc::clone(&state.service);
    let deleted = {
        let coll = coll.clone();
        blocking(move || service.delete_documents(&db, &coll, &req.ids)).await?
    };
    metrics::record_write_operation(&coll, "delete");
    Ok(Json(DeleteDocumentsResponse {
        message: "Documents deleted successfully".into(),
        deleted,
    }))
}

/// `POST /api/v1/database/:db/collections/:coll/documents/query`
pub async fn query_documents(
    State(state): State<AppState>,
    Path((db, coll)): Path<(String, String)>,
    Json(req): Json<QueryDocumentsRequest>,
) -> Result<Json<Vec<QueryHitView>>, ApiError> {
    let request = QueryRequest {
        top_k: req.top_k,
        query_embedding: req.query_embedding,
        max_distance: req.max_distance,
        filter: req.filter,
    };

    let service = Arc::clone(&state.service);
    let hits = {
        let coll = coll.clone();
        blocking(move || service.query(&db, &coll, request)).await?
    };
    metrics::record_query_operation(&coll, hits.len());
    Ok(Json(hits.iter().map(QueryHitView::from).collect()))
}
