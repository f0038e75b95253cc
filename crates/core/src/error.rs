//! Error types surfaced by the database service layer.
//!
//! Every fallible core operation returns [`DbError`], a tagged kind plus a
//! human-readable message. The HTTP layer is the sole translator of kinds to
//! status codes; engine-native errors never cross the crate boundary.

use thiserror::Error;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, DbError>;

/// Surface error taxonomy of the database service.
#[derive(Debug, Error)]
pub enum DbError {
    /// Malformed or semantically invalid request (empty name or batch,
    /// dimension mismatch, bad filter syntax).
    #[error("{0}")]
    InvalidInput(String),

    /// Database, collection, or document absent.
    #[error("{0}")]
    NotFound(String),

    /// Database or collection create conflict.
    #[error("{0}")]
    AlreadyExists(String),

    /// Encode/decode failure of a persisted record.
    #[error("{0}")]
    Serialization(String),

    /// KV engine or filesystem failure during required I/O.
    #[error("{0}")]
    Storage(String),

    /// ANN index failure or other unexpected core failure.
    #[error("{0}")]
    Internal(String),
}

impl DbError {
    /// Short machine-readable name of the kind, used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DbError::InvalidInput(_) => "invalid_input",
            DbError::NotFound(_) => "not_found",
            DbError::AlreadyExists(_) => "already_exists",
            DbError::Serialization(_) => "serialization",
            DbError::Storage(_) => "storage",
            DbError::Internal(_) => "internal",
        }
    }
}
