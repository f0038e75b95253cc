//! Catalog of databases, collections, and their statistics.
//!
//! Records live in reserved KV tables as bincode rows. Databases are keyed
//! `db:{name}`; collections are keyed by their namespace `{db}.{coll}`.
//! Range scans enumerate them: `[db:, db;)` covers all databases and
//! `[{db}., {db}/)` covers one database's collections (the terminators are
//! the ASCII successors of `:` and `.`).
//!
//! A collection record carries two derived artifacts: the URI of its KV
//! table and the filesystem path of its ANN index file. Both are pure
//! functions of the names, so deleting and recreating a collection yields
//! the same derivations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::kv::KvEngine;

/// Reserved table holding database and collection records.
pub const CATALOG_TABLE: &str = "table:_catalog";
/// Reserved table holding per-collection statistics.
pub const STATS_TABLE: &str = "table:_stats";
/// Reserved table mapping ANN labels (decimal strings) to document ids.
pub const LABEL_TABLE: &str = "table:label_docID";

/// Catalog key of a database record.
pub fn database_key(db: &str) -> String {
    format!("db:{db}")
}

/// Catalog key of a collection record: the namespace `{db}.{coll}`.
pub fn namespace_key(db: &str, coll: &str) -> String {
    format!("{db}.{coll}")
}

/// KV table URI holding a collection's document rows.
pub fn collection_table_uri(db: &str, coll: &str) -> String {
    format!("table:collection-{coll}-{db}")
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Catalog record of a database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseRecord {
    pub uuid: Uuid,
    pub name: String,
    pub config: HashMap<String, String>,
}

/// Catalog record of a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRecord {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub ns: String,
    pub table_uri: String,
    pub vector_index_uri: String,
    #[serde(rename = "createdAt")]
    pub created_at_ms: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at_ms: i64,
}

/// Per-collection statistics, updated on every successful mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionStats {
    pub doc_count: i64,
    pub index_size_bytes: u64,
}

/// Summary of a database for list responses.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub name: String,
    #[serde(rename = "collectionCount")]
    pub collection_count: usize,
    pub empty: bool,
}

fn storage(context: &str, e: impl std::fmt::Display) -> DbError {
    DbError::Storage(format!("{context}: {e}"))
}

fn decode_err(context: &str, e: impl std::fmt::Display) -> DbError {
    DbError::Serialization(format!("{context}: {e}"))
}

/// Catalog over the reserved KV tables.
pub struct Catalog {
    kv: Arc<KvEngine>,
    vectors_home: PathBuf,
}

impl Catalog {
    /// Builds a catalog over `kv`, deriving index paths under `vectors_home`.
    pub fn new(kv: Arc<KvEngine>, vectors_home: impl Into<PathBuf>) -> Self {
        Self {
            kv,
            vectors_home: vectors_home.into(),
        }
    }

    /// Filesystem path of a collection's ANN index file.
    pub fn index_path(&self, coll: &str) -> PathBuf {
        self.vectors_home.join(format!("{coll}.index"))
    }

    /// Creates the reserved tables if they do not exist yet.
    pub fn init_tables(&self) -> Result<()> {
        for table in [CATALOG_TABLE, STATS_TABLE, LABEL_TABLE] {
            self.kv
                .create_table(table)
                .map_err(|e| storage("failed to create reserved table", e))?;
        }
        Ok(())
    }

    // ── Databases ────────────────────────────────────────────────────

    /// Writes a new database record. Fails when the name is taken.
    pub fn create_database(&self, name: &str) -> Result<DatabaseRecord> {
        if name.is_empty() {
            return Err(DbError::InvalidInput("name cannot be empty".into()));
        }
        let key = database_key(name);
        let existing = self
            .kv
            .get(CATALOG_TABLE, key.as_bytes())
            .map_err(|e| storage("failed to check database record", e))?;
        if existing.is_some() {
            return Err(DbError::AlreadyExists("database already exists".into()));
        }

        let record = DatabaseRecord {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            config: HashMap::from([("Index".to_string(), "Flat".to_string())]),
        };
        let bytes = bincode::serialize(&record)
            .map_err(|e| decode_err("failed to encode database record", e))?;
        self.kv
            .put(CATALOG_TABLE, key.as_bytes(), &bytes)
            .map_err(|e| storage("failed to write database record", e))?;
        Ok(record)
    }

    /// Loads a database record, `None` when absent.
    pub fn load_database(&self, name: &str) -> Result<Option<DatabaseRecord>> {
        let key = database_key(name);
        let bytes = self
            .kv
            .get(CATALOG_TABLE, key.as_bytes())
            .map_err(|e| storage("failed to read database record", e))?;
        match bytes {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| decode_err("failed to decode database record", e)),
            None => Ok(None),
        }
    }

    /// Enumerates all databases with their collection counts.
    pub fn list_databases(&self) -> Result<Vec<DatabaseInfo>> {
        let rows = self
            .kv
            .scan_range(CATALOG_TABLE, b"db:", b"db;")
            .map_err(|e| storage("failed to scan catalog for databases", e))?;

        let mut databases = Vec::with_capacity(rows.len());
        for (_, value) in rows {
            let record: DatabaseRecord = bincode::deserialize(&value)
                .map_err(|e| decode_err("failed to decode database record", e))?;
            let collection_count = self.collection_count(&record.name)?;
            databases.push(DatabaseInfo {
                name: record.name,
                collection_count,
                empty: collection_count == 0,
            });
        }
        Ok(databases)
    }

    /// Removes a database record from the catalog.
    pub fn delete_database_record(&self, name: &str) -> Result<()> {
        let key = database_key(name);
        self.kv
            .delete(CATALOG_TABLE, key.as_bytes())
            .map_err(|e| storage("failed to delete database record", e))
    }

    // ── Collections ──────────────────────────────────────────────────

    /// Allocates a collection: KV table, catalog record, seeded stats.
    ///
    /// Fails with `AlreadyExists` when either the KV table or the catalog
    /// record is already present.
    pub fn create_collection(&self, db: &str, coll: &str) -> Result<CollectionRecord> {
        if coll.is_empty() {
            return Err(DbError::InvalidInput("name cannot be empty".into()));
        }
        let table_uri = collection_table_uri(db, coll);
        let ns = namespace_key(db, coll);

        let table_exists = self
            .kv
            .table_exists(&table_uri)
            .map_err(|e| storage("failed to check collection table", e))?;
        let record_exists = self
            .kv
            .get(CATALOG_TABLE, ns.as_bytes())
            .map_err(|e| storage("failed to check collection record", e))?
            .is_some();
        if table_exists || record_exists {
            return Err(DbError::AlreadyExists("collection already exists".into()));
        }

        self.kv
            .create_table(&table_uri)
            .map_err(|e| storage("failed to create collection table", e))?;

        let now = now_millis();
        let record = CollectionRecord {
            id: Uuid::new_v4(),
            ns: ns.clone(),
            table_uri,
            vector_index_uri: self.index_path(coll).to_string_lossy().into_owned(),
            created_at_ms: now,
            updated_at_ms: now,
        };
        let bytes = bincode::serialize(&record)
            .map_err(|e| decode_err("failed to encode collection record", e))?;
        self.kv
            .put(CATALOG_TABLE, ns.as_bytes(), &bytes)
            .map_err(|e| storage("failed to write collection record", e))?;

        self.put_stats(&ns, &CollectionStats::default())?;
        Ok(record)
    }

    /// Loads a collection record, failing with `NotFound` when absent.
    pub fn load_collection(&self, db: &str, coll: &str) -> Result<CollectionRecord> {
        let ns = namespace_key(db, coll);
        let bytes = self
            .kv
            .get(CATALOG_TABLE, ns.as_bytes())
            .map_err(|e| storage("failed to read collection record", e))?
            .ok_or_else(|| DbError::NotFound("collection not found".into()))?;
        bincode::deserialize(&bytes).map_err(|e| decode_err("failed to decode collection record", e))
    }

    /// Enumerates one database's collection records.
    pub fn list_collections(&self, db: &str) -> Result<Vec<CollectionRecord>> {
        if db.is_empty() {
            return Err(DbError::InvalidInput("name cannot be empty".into()));
        }
        let start = format!("{db}.");
        let end = format!("{db}/");
        let rows = self
            .kv
            .scan_range(CATALOG_TABLE, start.as_bytes(), end.as_bytes())
            .map_err(|e| storage("failed to scan catalog for collections", e))?;

        rows.into_iter()
            .map(|(_, value)| {
                bincode::deserialize(&value)
                    .map_err(|e| decode_err("failed to decode collection record", e))
            })
            .collect()
    }

    fn collection_count(&self, db: &str) -> Result<usize> {
        let start = format!("{db}.");
        let end = format!("{db}/");
        let rows = self
            .kv
            .scan_range(CATALOG_TABLE, start.as_bytes(), end.as_bytes())
            .map_err(|e| storage("failed to count collections", e))?;
        Ok(rows.len())
    }

    /// Removes a collection record from the catalog.
    pub fn delete_collection_record(&self, ns: &str) -> Result<()> {
        self.kv
            .delete(CATALOG_TABLE, ns.as_bytes())
            .map_err(|e| storage("failed to delete collection record", e))
    }

    // ── Stats ────────────────────────────────────────────────────────

    /// Loads a collection's stats record, `None` when absent.
    pub fn load_stats(&self, ns: &str) -> Result<Option<CollectionStats>> {
        let bytes = self
            .kv
            .get(STATS_TABLE, ns.as_bytes())
            .map_err(|e| storage("failed to read stats record", e))?;
        match bytes {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| decode_err("failed to decode stats record", e)),
            None => Ok(None),
        }
    }

    /// Writes a collection's stats record.
    pub fn put_stats(&self, ns: &str, stats: &CollectionStats) -> Result<()> {
        let bytes =
            bincode::serialize(stats).map_err(|e| decode_err("failed to encode stats record", e))?;
        self.kv
            .put(STATS_TABLE, ns.as_bytes(), &bytes)
            .map_err(|e| storage("failed to write stats record", e))
    }

    /// Removes a collection's stats record.
    pub fn delete_stats(&self, ns: &str) -> Result<()> {
        self.kv
            .delete(STATS_TABLE, ns.as_bytes())
            .map_err(|e| storage("failed to delete stats record", e))
    }

    /// Shared handle to the underlying KV engine.
    pub fn kv(&self) -> &Arc<KvEngine> {
        &self.kv
    }

    /// Directory holding per-collection index files.
    pub fn vectors_home(&self) -> &Path {
        &self.vectors_home
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn catalog() -> (Catalog, TempDir, TempDir) {
        let kv_dir = TempDir::new().unwrap();
        let vec_dir = TempDir::new().unwrap();
        let kv = Arc::new(KvEngine::open(kv_dir.path()).unwrap());
        let catalog = Catalog::new(kv, vec_dir.path());
        catalog.init_tables().unwrap();
        (catalog, kv_dir, vec_dir)
    }

    #[test]
    fn key_derivations() {
        assert_eq!(database_key("db1"), "db:db1");
        assert_eq!(namespace_key("db1", "c1"), "db1.c1");
        assert_eq!(collection_table_uri("db1", "c1"), "table:collection-c1-db1");
    }

    #[test]
    fn create_database_then_duplicate_conflicts() {
        let (catalog, _kv, _vec) = catalog();
        let record = catalog.create_database("db1").unwrap();
        assert_eq!(record.name, "db1");
        assert_eq!(record.config.get("Index").map(String::as_str), Some("Flat"));

        assert!(matches!(
            catalog.create_database("db1"),
            Err(DbError::AlreadyExists(_))
        ));
    }

    #[test]
    fn empty_database_name_rejected() {
        let (catalog, _kv, _vec) = catalog();
        assert!(matches!(
            catalog.create_database(""),
            Err(DbError::InvalidInput(_))
        ));
    }

    #[test]
    fn list_databases_counts_collections() {
        let (catalog, _kv, _vec) = catalog();
        catalog.create_database("db1").unwrap();
        catalog.create_database("db2").unwrap();
        catalog.create_collection("db1", "c1").unwrap();
        catalog.create_collection("db1", "c2").unwrap();

        let mut infos = catalog.list_databases().unwrap();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].collection_count, 2);
        assert!(!infos[0].empty);
        assert_eq!(infos[1].collection_count, 0);
        assert!(infos[1].empty);
    }

    #[test]
    fn collection_record_derivations_are_stable() {
        let (catalog, _kv, _vec) = catalog();
        catalog.create_database("db1").unwrap();
        let record = catalog.create_collection("db1", "c1").unwrap();
        assert_eq!(record.ns, "db1.c1");
        assert_eq!(record.table_uri, "table:collection-c1-db1");
        assert!(record.vector_index_uri.ends_with("c1.index"));

        let loaded = catalog.load_collection("db1", "c1").unwrap();
        assert_eq!(loaded.table_uri, record.table_uri);
        assert_eq!(loaded.vector_index_uri, record.vector_index_uri);
    }

    #[test]
    fn create_collection_seeds_stats_and_table() {
        let (catalog, _kv, _vec) = catalog();
        let record = catalog.create_collection("db1", "c1").unwrap();
        assert!(catalog.kv().table_exists(&record.table_uri).unwrap());

        let stats = catalog.load_stats(&record.ns).unwrap().unwrap();
        assert_eq!(stats.doc_count, 0);
        assert_eq!(stats.index_size_bytes, 0);
    }

    #[test]
    fn duplicate_collection_conflicts() {
        let (catalog, _kv, _vec) = catalog();
        catalog.create_collection("db1", "c1").unwrap();
        assert!(matches!(
            catalog.create_collection("db1", "c1"),
            Err(DbError::AlreadyExists(_))
        ));
    }

    #[test]
    fn missing_collection_is_not_found() {
        let (catalog, _kv, _vec) = catalog();
        assert!(matches!(
            catalog.load_collection("db1", "ghost"),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn collection_range_does_not_leak_across_databases() {
        let (catalog, _kv, _vec) = catalog();
        catalog.create_collection("db1", "c1").unwrap();
        catalog.create_collection("db10", "cx").unwrap();

        let colls = catalog.list_collections("db1").unwrap();
        assert_eq!(colls.len(), 1);
        assert_eq!(colls[0].ns, "db1.c1");
    }
}
