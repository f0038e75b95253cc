//! Embedded transactional KV engine adapter.
//!
//! Wraps a [`redb`] database as a set of named tables with binary keys and
//! values. The service layer talks only to this adapter: point get/put/delete,
//! half-open range scans, atomic batch writers, and table lifecycle. Engine
//! errors are folded into [`KvError`] so callers can match *not found* and
//! *busy* without depending on engine-native types.
//!
//! Tables are the source of truth for documents and catalog records; ANN
//! index files are derived, per-collection artifacts.

use redb::{ReadableTable, TableDefinition, TableHandle};
use std::path::Path;
use thiserror::Error;

/// Filename of the single engine environment file inside the data directory.
const ENGINE_FILE: &str = "kv.redb";

/// Errors surfaced by the KV adapter.
#[derive(Debug, Error)]
pub enum KvError {
    /// The named table does not exist.
    #[error("table not found: {0}")]
    NotFound(String),

    /// The table is held open elsewhere and cannot be dropped right now.
    #[error("table busy: {0}")]
    Busy(String),

    /// Any other engine or I/O failure.
    #[error("kv engine error: {0}")]
    Backend(String),
}

impl KvError {
    /// True for the *not found* kind, which drop paths tolerate.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::NotFound(_))
    }

    /// True for the *busy* kind, which drop paths tolerate.
    pub fn is_busy(&self) -> bool {
        matches!(self, KvError::Busy(_))
    }
}

fn backend(e: impl std::fmt::Display) -> KvError {
    KvError::Backend(e.to_string())
}

fn table_err(table: &str, e: redb::TableError) -> KvError {
    match e {
        redb::TableError::TableDoesNotExist(_) => KvError::NotFound(table.to_string()),
        other => KvError::Backend(other.to_string()),
    }
}

/// Handle to the embedded KV engine. Cheap to share behind an `Arc`; the
/// engine serializes writers internally and supports concurrent readers.
pub struct KvEngine {
    db: redb::Database,
}

type Bytes = Vec<u8>;

impl KvEngine {
    /// Opens (or creates) the engine environment inside `dir`.
    pub fn open(dir: &Path) -> Result<Self, KvError> {
        std::fs::create_dir_all(dir).map_err(backend)?;
        let db = redb::Database::create(dir.join(ENGINE_FILE)).map_err(backend)?;
        tracing::info!(dir = %dir.display(), "kv engine opened");
        Ok(Self { db })
    }

    /// Creates a table. Idempotent: an existing table is left untouched.
    pub fn create_table(&self, table: &str) -> Result<(), KvError> {
        let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
        let wtx = self.db.begin_write().map_err(backend)?;
        wtx.open_table(def).map_err(|e| table_err(table, e))?;
        wtx.commit().map_err(backend)?;
        Ok(())
    }

    /// Drops a table and all its rows. Fails with [`KvError::NotFound`] when
    /// the table does not exist.
    pub fn delete_table(&self, table: &str) -> Result<(), KvError> {
        let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
        let wtx = self.db.begin_write().map_err(backend)?;
        let existed = wtx.delete_table(def).map_err(|e| table_err(table, e))?;
        wtx.commit().map_err(backend)?;
        if existed {
            Ok(())
        } else {
            Err(KvError::NotFound(table.to_string()))
        }
    }

    /// Returns whether a table exists.
    pub fn table_exists(&self, table: &str) -> Result<bool, KvError> {
        let rtx = self.db.begin_read().map_err(backend)?;
        let mut tables = rtx.list_tables().map_err(backend)?;
        Ok(tables.any(|h| h.name() == table))
    }

    /// Point lookup. `Ok(None)` when the key is absent; an error when the
    /// table itself is missing.
    pub fn get(&self, table: &str, key: &[u8]) -> Result<Option<Bytes>, KvError> {
        let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
        let rtx = self.db.begin_read().map_err(backend)?;
        let t = rtx.open_table(def).map_err(|e| table_err(table, e))?;
        let guard = t.get(key).map_err(backend)?;
        Ok(guard.map(|g| g.value().to_vec()))
    }

    /// Point lookup with a string key, decoding the value as UTF-8.
    pub fn get_string(&self, table: &str, key: &str) -> Result<Option<String>, KvError> {
        match self.get(table, key.as_bytes())? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| KvError::Backend(format!("non-utf8 value in {table}: {e}"))),
            None => Ok(None),
        }
    }

    /// Inserts or overwrites a single key.
    pub fn put(&self, table: &str, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
        let wtx = self.db.begin_write().map_err(backend)?;
        require_table(&wtx, table)?;
        {
            let mut t = wtx.open_table(def).map_err(|e| table_err(table, e))?;
            t.insert(key, value).map_err(backend)?;
        }
        wtx.commit().map_err(backend)?;
        Ok(())
    }

    /// Inserts or overwrites a single key with string key and value.
    pub fn put_string(&self, table: &str, key: &str, value: &str) -> Result<(), KvError> {
        self.put(table, key.as_bytes(), value.as_bytes())
    }

    /// Deletes a single key. Absent keys are a no-op.
    pub fn delete(&self, table: &str, key: &[u8]) -> Result<(), KvError> {
        let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
        let wtx = self.db.begin_write().map_err(backend)?;
        require_table(&wtx, table)?;
        {
            let mut t = wtx.open_table(def).map_err(|e| table_err(table, e))?;
            t.remove(key).map_err(backend)?;
        }
        wtx.commit().map_err(backend)?;
        Ok(())
    }

    /// Scans `[start, end)` in ascending key order, materializing the rows.
    pub fn scan_range(
        &self,
        table: &str,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<(Bytes, Bytes)>, KvError> {
        let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
        let rtx = self.db.begin_read().map_err(backend)?;
        let t = rtx.open_table(def).map_err(|e| table_err(table, e))?;
        let mut rows = Vec::new();
        for item in t.range::<&[u8]>(start..end).map_err(backend)? {
            let (k, v) = item.map_err(backend)?;
            rows.push((k.value().to_vec(), v.value().to_vec()));
        }
        Ok(rows)
    }

    /// Scans every row of a table in ascending key order.
    pub fn scan_all(&self, table: &str) -> Result<Vec<(Bytes, Bytes)>, KvError> {
        let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(table);
        let rtx = self.db.begin_read().map_err(backend)?;
        let t = rtx.open_table(def).map_err(|e| table_err(table, e))?;
        let mut rows = Vec::new();
        for item in t.iter().map_err(backend)? {
            let (k, v) = item.map_err(backend)?;
            rows.push((k.value().to_vec(), v.value().to_vec()));
        }
        Ok(rows)
    }

    /// Opens a batch writer against `table`. Puts are buffered in memory and
    /// applied in one atomic transaction on [`BatchWriter::commit`].
    pub fn batch(&self, table: &str) -> BatchWriter<'_> {
        BatchWriter {
            engine: self,
            table: table.to_string(),
            puts: Vec::new(),
        }
    }
}

/// Rejects writes against tables that were never created: opening a table in
/// a write transaction would otherwise create it implicitly, resurrecting
/// dropped collections.
fn require_table(wtx: &redb::WriteTransaction, table: &str) -> Result<(), KvError> {
    let mut tables = wtx.list_tables().map_err(backend)?;
    if tables.any(|h| h.name() == table) {
        Ok(())
    } else {
        Err(KvError::NotFound(table.to_string()))
    }
}

/// Buffers puts against a single table and commits them atomically.
///
/// Dropping an uncommitted writer discards the buffered puts; errors from
/// the underlying engine surface on [`BatchWriter::commit`].
pub struct BatchWriter<'a> {
    engine: &'a KvEngine,
    table: String,
    puts: Vec<(Bytes, Bytes)>,
}

impl BatchWriter<'_> {
    /// Buffers a binary put.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.puts.push((key.to_vec(), value.to_vec()));
    }

    /// Buffers a put with string key and value.
    pub fn put_string(&mut self, key: &str, value: &str) {
        self.puts.push((key.as_bytes().to_vec(), value.as_bytes().to_vec()));
    }

    /// Number of buffered puts.
    pub fn len(&self) -> usize {
        self.puts.len()
    }

    /// True when nothing has been buffered yet.
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty()
    }

    /// Applies all buffered puts in one transaction. Either every put becomes
    /// visible or none do.
    pub fn commit(self) -> Result<(), KvError> {
        let def: TableDefinition<&[u8], &[u8]> = TableDefinition::new(&self.table);
        let wtx = self.engine.db.begin_write().map_err(backend)?;
        require_table(&wtx, &self.table)?;
        {
            let mut t = wtx.open_table(def).map_err(|e| table_err(&self.table, e))?;
            for (key, value) in &self.puts {
                t.insert(key.as_slice(), value.as_slice()).map_err(backend)?;
            }
        }
        wtx.commit().map_err(backend)?;
        Ok(())
    }
}
