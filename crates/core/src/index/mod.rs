//! ANN index engine and process-wide index cache.
//!
//! [`flat::FlatIndex`] is an exhaustive flat index over L2 distance — every
//! stored vector is scanned per query. [`cache::IndexCache`] keeps loaded
//! indexes in memory, bounded by an LRU policy, and hands out exclusively
//! lockable handles so at most one writer mutates an index at a time.

pub mod cache;
pub mod flat;

pub use cache::{CachedIndex, IndexCache};
pub use flat::{normalize_batch, FlatIndex, IndexError};
