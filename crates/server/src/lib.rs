//! emberdb-server — HTTP server for emberdb.
//!
//! Provides the REST API over the core database service. Database logic
//! lives in `emberdb-core`.

/// REST API layer: Axum router, HTTP handlers, models, errors, metrics.
pub mod api;
