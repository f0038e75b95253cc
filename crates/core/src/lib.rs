//! emberdb-core — single-node hybrid vector-document database.
//!
//! Collections of documents carry opaque content, typed metadata, and a
//! dense f32 embedding. Documents persist in an embedded transactional KV
//! engine; embeddings live in per-collection flat ANN index files. Queries
//! run approximate nearest-neighbor search over the embeddings, optionally
//! intersected with a structured metadata filter.
//!
//! The crate is organised leaves-first:
//!
//! - [`kv`] — embedded KV engine adapter (tables, range scans, atomic
//!   batch writers).
//! - [`index`] — flat L2 ANN index and the process-wide index cache with
//!   per-entry exclusive locks.
//! - [`catalog`] — database / collection / stats records and URI derivation.
//! - [`filter`] — metadata filter evaluator (`$and`, `$or`, comparison and
//!   set operators).
//! - [`service`] — the coordinated write path, the query pipeline, and
//!   database / collection lifecycle.
//!
//! The HTTP surface lives in the sibling `emberdb-server` crate.

/// Catalog records and key derivation.
pub mod catalog;
/// Compile-time tuning constants and limits.
pub mod config;
/// Document, metadata, and batch types.
pub mod document;
/// Surface error taxonomy.
pub mod error;
/// Metadata filter evaluation.
pub mod filter;
/// ANN index engine and cache.
pub mod index;
/// Embedded KV engine adapter.
pub mod kv;
/// Database service layer.
pub mod service;

pub use catalog::{CollectionRecord, CollectionStats, DatabaseInfo, DatabaseRecord};
pub use document::{Document, DocumentBatch, Metadata, MetadataValue};
pub use error::{DbError, Result};
pub use service::{CollectionEntry, DbService, DocumentUpdate, QueryHit, QueryRequest};
