//! Process-wide cache of loaded ANN indexes.
//!
//! The cache maps index file paths to [`CachedIndex`] entries. Each entry
//! carries a per-entry mutex: a mutator must hold it for the entire
//! modify-then-persist sequence, which guarantees at most one concurrent
//! writer per index path across the process. The map itself sits behind a
//! read/write lock; lookups take the read lock, inserts and evictions take
//! the write lock with a double-checked lookup after upgrading.
//!
//! Capacity is bounded: admitting a new entry at capacity evicts the least
//! recently used one, flushing it to disk first if dirty.

use crate::index::flat::{FlatIndex, IndexError};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A cached ANN index with its exclusive-access lock and dirty flag.
pub struct CachedIndex {
    path: PathBuf,
    index: Mutex<FlatIndex>,
    dirty: AtomicBool,
    last_used: Mutex<Instant>,
}

impl CachedIndex {
    fn new(path: PathBuf, index: FlatIndex) -> Self {
        Self {
            path,
            index: Mutex::new(index),
            dirty: AtomicBool::new(false),
            last_used: Mutex::new(Instant::now()),
        }
    }

    /// File path this entry is keyed by.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquires exclusive access to the index. Hold the guard across the
    /// whole modify-then-persist sequence.
    pub fn lock(&self) -> MutexGuard<'_, FlatIndex> {
        self.index.lock()
    }

    /// Notes that the in-memory index differs from disk. Idempotent.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clears the dirty flag after a successful persist.
    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Whether the entry has unpersisted modifications.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    /// Writes the index to disk under the entry lock if dirty.
    fn flush(&self) -> Result<(), IndexError> {
        if !self.is_dirty() {
            return Ok(());
        }
        let index = self.lock();
        // Re-check: a writer may have persisted while we waited.
        if !self.is_dirty() {
            return Ok(());
        }
        index.write_to_file(&self.path)?;
        self.clear_dirty();
        Ok(())
    }
}

/// LRU cache of ANN indexes keyed by file path.
pub struct IndexCache {
    entries: RwLock<HashMap<PathBuf, Arc<CachedIndex>>>,
    capacity: usize,
}

impl IndexCache {
    /// Creates a cache bounded at `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Returns the cached entry for `path`, loading it from disk or creating
    /// a fresh empty index of `dimension` when the file cannot be read.
    pub fn get_or_create(
        &self,
        path: &Path,
        dimension: usize,
    ) -> Result<Arc<CachedIndex>, IndexError> {
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(path) {
                entry.touch();
                return Ok(Arc::clone(entry));
            }
        }

        let mut entries = self.entries.write();
        // Double-check: another thread may have inserted while we upgraded.
        if let Some(entry) = entries.get(path) {
            entry.touch();
            return Ok(Arc::clone(entry));
        }

        let index = match FlatIndex::read_from_file(path) {
            Ok(index) => index,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "index load failed, creating empty index");
                FlatIndex::new(dimension)?
            }
        };

        if entries.len() >= self.capacity {
            evict_oldest(&mut entries);
        }

        let entry = Arc::new(CachedIndex::new(path.to_path_buf(), index));
        entries.insert(path.to_path_buf(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Marks the entry for `path` dirty. No-op when absent.
    pub fn mark_dirty(&self, path: &Path) {
        if let Some(entry) = self.entries.read().get(path) {
            entry.mark_dirty();
        }
    }

    /// Flushes one entry to disk if dirty. Silent no-op when absent.
    pub fn flush_one(&self, path: &Path) -> Result<(), IndexError> {
        let entry = {
            let entries = self.entries.read();
            entries.get(path).cloned()
        };
        match entry {
            Some(entry) => entry.flush(),
            None => Ok(()),
        }
    }

    /// Flushes every dirty entry. The path set is snapshotted first so
    /// concurrent inserts and removals do not invalidate the walk.
    pub fn flush_all(&self) -> Result<(), IndexError> {
        let paths: Vec<PathBuf> = self.entries.read().keys().cloned().collect();
        for path in paths {
            self.flush_one(&path)?;
        }
        Ok(())
    }

    /// Flushes then releases the entry for `path`. Safe when absent.
    pub fn remove(&self, path: &Path) -> Result<(), IndexError> {
        self.flush_one(path)?;
        self.entries.write().remove(path);
        Ok(())
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no entries are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Flushes all dirty entries and releases everything.
    pub fn close(&self) -> Result<(), IndexError> {
        self.flush_all()?;
        self.entries.write().clear();
        Ok(())
    }
}

/// Removes the least-recently-used entry, flushing it first if dirty.
/// Must be called with the map write lock held, which also serializes any
/// racing `get_or_create` on the evicted path behind the release.
fn evict_oldest(entries: &mut HashMap<PathBuf, Arc<CachedIndex>>) {
    let oldest = entries
        .iter()
        .min_by_key(|(_, entry)| entry.last_used())
        .map(|(path, _)| path.clone());

    if let Some(path) = oldest {
        if let Some(entry) = entries.remove(&path) {
            if let Err(e) = entry.flush() {
                tracing::error!(path = %path.display(), error = %e, "flush before eviction failed");
            }
        }
    }
}
