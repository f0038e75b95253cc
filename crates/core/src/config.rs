//! Global configuration constants for emberdb.
//!
//! All tuning parameters, input validation limits, and server defaults are
//! defined here. These are compile-time constants; runtime configuration is
//! handled via CLI arguments and environment variables in `main.rs`.

/// Maximum number of ANN indexes kept in the process-wide cache.
///
/// When the cache is full, the least-recently-used index is flushed to disk
/// (if dirty) and released before a new one is admitted.
pub const INDEX_CACHE_CAPACITY: usize = 100;

/// Result-set size at or below which the query pipeline resolves documents
/// sequentially instead of fanning out to a worker pool.
pub const QUERY_SEQUENTIAL_THRESHOLD: usize = 3;

/// Maximum number of worker threads used to resolve one query's candidates.
pub const QUERY_MAX_WORKERS: usize = 10;

/// Maximum allowed embedding dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Maximum number of results (`top_k`) per query request.
pub const MAX_TOP_K: usize = 10_000;

/// Maximum length of a database or collection name in characters.
pub const MAX_NAME_LEN: usize = 128;

/// Default HTTP server port.
pub const DEFAULT_PORT: u16 = 8180;

/// Default directory for the KV engine environment.
pub const DEFAULT_DATA_DIR: &str = "volumes/kv";

/// Default directory for per-collection ANN index files.
pub const DEFAULT_VECTORS_DIR: &str = "volumes/vectors";

/// Maximum HTTP request body size in bytes (100 MB — embedding batches are large).
pub const MAX_REQUEST_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Interval between background refreshes of collection-level gauges.
pub const METRICS_REFRESH_SECS: u64 = 15;
