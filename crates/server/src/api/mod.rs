//! REST API layer built on Axum.
//!
//! Provides HTTP handlers for database and collection management, document
//! CRUD, and similarity queries. Includes middleware for request ID tracing,
//! metrics collection, HTTP tracing, CORS, and body size limits.

/// API error types mapped to HTTP status codes.
pub mod errors;
/// HTTP request handlers and application state.
pub mod handlers;
/// Prometheus metrics recording and background collection.
pub mod metrics;
/// Request and response data transfer objects.
pub mod models;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use handlers::AppState;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use emberdb_core::config;

async fn request_id_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("request", request_id = %request_id);
    async move {
        let mut response = next.run(req).await;
        response.headers_mut().insert(
            axum::http::HeaderName::from_static("x-request-id"),
            axum::http::HeaderValue::from_str(&request_id)
                .expect("UUID v4 is always valid ASCII for header values"),
        );
        response
    }
    .instrument(span)
    .await
}

async fn metrics_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(req).await;
    metrics::record_request(&method, &path, response.status().as_u16(), start.elapsed());
    response
}

/// Builds the Axum router with all routes and middleware layers.
pub fn create_router(state: AppState) -> Router {
    let api_v1 = Router::new()
        .route("/database", post(handlers::create_database))
        .route("/databases", get(handlers::list_databases))
        .route("/database/:db", delete(handlers::delete_database))
        .route(
            "/database/:db/collections",
            get(handlers::list_collections).post(handlers::create_collection),
        )
        .route(
            "/database/:db/collections/:coll",
            get(handlers::get_collection).delete(handlers::delete_collection),
        )
        .route(
            "/database/:db/collections/:coll/documents",
            post(handlers::insert_documents)
                .get(handlers::get_documents)
                .put(handlers::update_documents)
                .delete(handlers::delete_documents),
        )
        .route(
            "/database/:db/collections/:coll/documents/query",
            post(handlers::query_documents),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_endpoint))
        .nest("/api/v1", api_v1)
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(config::MAX_REQUEST_BODY_BYTES))
        .with_state(state)
}
