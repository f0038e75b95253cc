//! Database service layer: coordinated writes, hybrid queries, lifecycle.
//!
//! [`DbService`] ties the KV engine, the catalog, and the index cache
//! together. The write path keeps the document table, the ANN index, the
//! label mapping, and the stats record consistent by performing the whole
//! sequence under the index entry's exclusive lock:
//!
//! 1. commit the document batch to the collection's KV table,
//! 2. add the embeddings to the ANN index (labels are assigned contiguously
//!    from the pre-add `ntotal`),
//! 3. commit the label → document-id batch,
//! 4. persist the index file and clear the dirty flag,
//! 5. update the stats record.
//!
//! Queries never mutate: the ANN search runs under a short-lived entry lock,
//! then label resolution, document loads, and filtering fan out to a bounded
//! worker pool. A candidate that cannot be resolved — missing mapping,
//! missing row, decode failure, filter type error — is silently dropped so a
//! partially-corrupt collection still answers.

use rayon::prelude::*;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::{
    Catalog, CollectionRecord, CollectionStats, DatabaseInfo, DatabaseRecord, LABEL_TABLE,
};
use crate::config;
use crate::document::{Document, DocumentBatch, Metadata};
use crate::error::{DbError, Result};
use crate::filter::{matches_filter, validate_filter};
use crate::index::flat::FlatIndex;
use crate::index::{IndexCache, IndexError};
use crate::kv::KvEngine;

/// A similarity query against one collection.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Number of nearest neighbors to retrieve.
    pub top_k: usize,
    /// Query vector; must match the collection's index dimension.
    pub query_embedding: Vec<f32>,
    /// When positive, drops results with `distance >= max_distance`.
    pub max_distance: f32,
    /// Optional metadata filter applied after the ANN search.
    pub filter: Option<Map<String, Value>>,
}

/// One ranked query result.
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub document: Document,
    pub distance: f32,
}

/// A collection record together with its current stats.
#[derive(Debug, Clone)]
pub struct CollectionEntry {
    pub record: CollectionRecord,
    pub stats: CollectionStats,
}

/// Metadata-merge update of one document.
#[derive(Debug, Clone)]
pub struct DocumentUpdate {
    pub document_id: String,
    pub updates: Metadata,
}

fn storage(context: &str, e: impl std::fmt::Display) -> DbError {
    DbError::Storage(format!("{context}: {e}"))
}

/// The database service. Construct once at startup and share by reference;
/// tests build isolated instances over temp directories.
pub struct DbService {
    catalog: Catalog,
    index_cache: Arc<IndexCache>,
}

impl DbService {
    /// Builds the service: opens the reserved tables and ensures the vectors
    /// directory exists.
    pub fn new(
        kv: Arc<KvEngine>,
        vectors_home: impl Into<PathBuf>,
        index_cache_capacity: usize,
    ) -> Result<Self> {
        let vectors_home = vectors_home.into();
        std::fs::create_dir_all(&vectors_home)
            .map_err(|e| storage("failed to create vectors directory", e))?;
        let catalog = Catalog::new(kv, vectors_home);
        catalog.init_tables()?;
        Ok(Self {
            catalog,
            index_cache: Arc::new(IndexCache::new(index_cache_capacity)),
        })
    }

    /// Catalog accessor, used by the HTTP layer for list endpoints.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Flushes every dirty cached index to disk.
    pub fn flush(&self) -> Result<()> {
        self.index_cache
            .flush_all()
            .map_err(|e| storage("failed to flush index cache", e))
    }

    /// Flushes and releases all cached indexes. Call on shutdown.
    pub fn close(&self) -> Result<()> {
        self.index_cache
            .close()
            .map_err(|e| storage("failed to close index cache", e))
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Creates a database.
    pub fn create_database(&self, name: &str) -> Result<DatabaseRecord> {
        let record = self.catalog.create_database(name)?;
        tracing::info!(database = %name, "database created");
        Ok(record)
    }

    /// Lists all databases with collection counts.
    pub fn list_databases(&self) -> Result<Vec<DatabaseInfo>> {
        self.catalog.list_databases()
    }

    /// Deletes a database, cascading to all of its collections.
    pub fn delete_database(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(DbError::InvalidInput("name cannot be empty".into()));
        }
        self.catalog
            .load_database(name)?
            .ok_or_else(|| DbError::NotFound("database not found".into()))?;

        let collections = self.catalog.list_collections(name)?;
        let count = collections.len();
        for record in collections {
            self.remove_collection_resources(&record)?;
        }
        self.catalog.delete_database_record(name)?;
        tracing::info!(database = %name, collections_deleted = count, "database deleted");
        Ok(())
    }

    /// Creates a collection: KV table, catalog record, seeded stats.
    pub fn create_collection(&self, db: &str, coll: &str) -> Result<CollectionRecord> {
        let record = self.catalog.create_collection(db, coll)?;
        tracing::info!(database = %db, collection = %coll, "collection created");
        Ok(record)
    }

    /// Lists one database's collections.
    pub fn list_collections(&self, db: &str) -> Result<Vec<CollectionRecord>> {
        self.catalog.list_collections(db)
    }

    /// Loads one collection's record and stats.
    pub fn get_collection(&self, db: &str, coll: &str) -> Result<CollectionEntry> {
        let record = self.catalog.load_collection(db, coll)?;
        let stats = self.catalog.load_stats(&record.ns)?.unwrap_or_default();
        Ok(CollectionEntry { record, stats })
    }

    /// Deletes a collection and its resources.
    pub fn delete_collection(&self, db: &str, coll: &str) -> Result<()> {
        if coll.is_empty() {
            return Err(DbError::InvalidInput("name cannot be empty".into()));
        }
        let record = self.catalog.load_collection(db, coll)?;
        self.remove_collection_resources(&record)?;
        tracing::info!(database = %db, collection = %coll, "collection deleted");
        Ok(())
    }

    /// Tears down one collection's resources: cached index, index file, KV
    /// table, catalog record, stats record. File and table removal tolerate
    /// *not found* / *busy*; the catalog record is removed afterwards so the
    /// catalog never claims a collection whose table is gone.
    fn remove_collection_resources(&self, record: &CollectionRecord) -> Result<()> {
        let index_path = Path::new(&record.vector_index_uri);
        if let Err(e) = self.index_cache.remove(index_path) {
            tracing::warn!(path = %record.vector_index_uri, error = %e, "failed to drop cached index");
        }
        if !record.vector_index_uri.is_empty() {
            if let Err(e) = std::fs::remove_file(index_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %record.vector_index_uri, error = %e, "failed to remove index file");
                }
            }
        }
        match self.catalog.kv().delete_table(&record.table_uri) {
            Ok(()) => {}
            Err(e) if e.is_not_found() || e.is_busy() => {
                tracing::warn!(table = %record.table_uri, error = %e, "tolerated table drop failure");
            }
            Err(e) => {
                return Err(storage("failed to drop collection table", e));
            }
        }
        self.catalog.delete_collection_record(&record.ns)?;
        self.catalog.delete_stats(&record.ns)?;
        Ok(())
    }

    // ── Write path ───────────────────────────────────────────────────

    /// Inserts a batch of documents given in array-of-structs form.
    ///
    /// Embeddings are persisted inside the document rows as well as in the
    /// ANN index.
    pub fn insert_documents(&self, db: &str, coll: &str, documents: Vec<Document>) -> Result<()> {
        if documents.is_empty() {
            return Err(DbError::InvalidInput(
                "documents slice cannot be empty".into(),
            ));
        }
        let dim = documents[0].embedding.len();
        if dim == 0 {
            return Err(DbError::InvalidInput(format!(
                "document with id {} has empty embedding",
                documents[0].id
            )));
        }
        let mut flat = Vec::with_capacity(documents.len() * dim);
        for doc in &documents {
            if doc.embedding.is_empty() {
                return Err(DbError::InvalidInput(format!(
                    "document with id {} has empty embedding",
                    doc.id
                )));
            }
            if doc.embedding.len() != dim {
                return Err(DbError::InvalidInput(format!(
                    "document {} has embedding dimension {}, expected {}",
                    doc.id,
                    doc.embedding.len(),
                    dim
                )));
            }
            flat.extend_from_slice(&doc.embedding);
        }
        self.insert_inner(db, coll, &documents, &flat, dim)
    }

    /// Inserts a batch of documents given in struct-of-arrays form.
    ///
    /// The flat embedding array feeds the ANN index directly and is not
    /// duplicated into the persisted rows.
    pub fn insert_document_batch(&self, db: &str, coll: &str, batch: DocumentBatch) -> Result<()> {
        batch.validate()?;
        let dim = batch.dimension();
        let DocumentBatch {
            ids,
            contents,
            embeddings,
            metadatas,
        } = batch;
        let documents: Vec<Document> = ids
            .into_iter()
            .zip(contents)
            .zip(metadatas)
            .map(|((id, content), metadata)| Document {
                id,
                content,
                embedding: Vec::new(),
                metadata,
            })
            .collect();
        self.insert_inner(db, coll, &documents, &embeddings, dim)
    }

    fn insert_inner(
        &self,
        db: &str,
        coll: &str,
        documents: &[Document],
        flat_embeddings: &[f32],
        dim: usize,
    ) -> Result<()> {
        let start = Instant::now();
        let n = documents.len();
        let record = self.catalog.load_collection(db, coll)?;
        let index_path = Path::new(&record.vector_index_uri).to_path_buf();

        let entry = self
            .index_cache
            .get_or_create(&index_path, dim)
            .map_err(|e| DbError::Internal(format!("failed to get or create vector index: {e}")))?;

        // Exclusive access for the whole modify-then-persist sequence; the
        // stats update stays inside so concurrent batches serialize fully.
        let mut index = entry.lock();

        if index.ntotal() > 0 && index.dimension() != dim {
            return Err(DbError::InvalidInput(format!(
                "embedding dimension {} does not match index dimension {}",
                dim,
                index.dimension()
            )));
        }
        if index.ntotal() == 0 && index.dimension() != dim {
            // Empty index left over from an earlier dimension: start fresh.
            *index = FlatIndex::new(dim)
                .map_err(|e| DbError::Internal(format!("failed to create vector index: {e}")))?;
        }

        let start_label = index.ntotal();

        let mut doc_writer = self.catalog.kv().batch(&record.table_uri);
        for doc in documents {
            let row = doc.to_row()?;
            doc_writer.put(doc.id.as_bytes(), &row);
        }
        doc_writer
            .commit()
            .map_err(|e| storage("failed to commit document batch", e))?;

        index
            .add(flat_embeddings, n)
            .map_err(|e| DbError::Internal(format!("failed to add embeddings to index: {e}")))?;
        entry.mark_dirty();

        let mut label_writer = self.catalog.kv().batch(LABEL_TABLE);
        for (i, doc) in documents.iter().enumerate() {
            let label = start_label + i as i64;
            label_writer.put_string(&label.to_string(), &doc.id);
        }
        label_writer
            .commit()
            .map_err(|e| storage("failed to commit label batch", e))?;

        index
            .write_to_file(&index_path)
            .map_err(|e| storage("failed to write index to file", e))?;
        entry.clear_dirty();

        let index_size = std::fs::metadata(&index_path)
            .map_err(|e| storage("failed to stat vector index file", e))?
            .len();

        let mut stats = self
            .catalog
            .load_stats(&record.ns)?
            .ok_or_else(|| DbError::Storage(format!("collection stats not found for {}", record.ns)))?;
        stats.doc_count += n as i64;
        stats.index_size_bytes = index_size;
        self.catalog.put_stats(&record.ns, &stats)?;

        tracing::info!(
            database = %db,
            collection = %coll,
            doc_count = n,
            start_label,
            duration_ms = start.elapsed().as_millis() as u64,
            "documents inserted"
        );
        Ok(())
    }

    // ── Query pipeline ───────────────────────────────────────────────

    /// Runs a similarity query: ANN search, label resolution, document
    /// load, optional distance cutoff and metadata filter. Results keep the
    /// ANN ranking order (ascending distance).
    pub fn query(&self, db: &str, coll: &str, request: QueryRequest) -> Result<Vec<QueryHit>> {
        let start = Instant::now();
        if request.top_k == 0 {
            return Err(DbError::InvalidInput("top_k must be greater than zero".into()));
        }
        if request.top_k > config::MAX_TOP_K {
            return Err(DbError::InvalidInput(format!(
                "top_k must be at most {}",
                config::MAX_TOP_K
            )));
        }
        if request.query_embedding.is_empty() {
            return Err(DbError::InvalidInput("query embedding cannot be empty".into()));
        }
        if let Some(filter) = &request.filter {
            validate_filter(filter).map_err(|e| DbError::InvalidInput(e.to_string()))?;
        }

        let record = self.catalog.load_collection(db, coll)?;
        let index_path = Path::new(&record.vector_index_uri);
        let entry = self
            .index_cache
            .get_or_create(index_path, request.query_embedding.len())
            .map_err(|e| DbError::Internal(format!("failed to load vector index: {e}")))?;

        let (distances, labels) = {
            let index = entry.lock();
            index
                .search(&request.query_embedding, request.top_k)
                .map_err(|e| match e {
                    IndexError::DimensionMismatch { .. } => DbError::InvalidInput(e.to_string()),
                    other => DbError::Internal(format!("failed to search vector index: {other}")),
                })?
        };

        let candidates: Vec<(i64, f32)> = labels.into_iter().zip(distances).collect();
        let resolve = |&(label, distance): &(i64, f32)| -> Option<QueryHit> {
            self.resolve_candidate(&record, &request, label, distance)
        };

        let resolved: Vec<Option<QueryHit>> =
            if candidates.len() <= config::QUERY_SEQUENTIAL_THRESHOLD {
                candidates.iter().map(&resolve).collect()
            } else {
                let workers = candidates.len().min(config::QUERY_MAX_WORKERS);
                let chunk_size = candidates.len().div_ceil(workers);
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .map_err(|e| DbError::Internal(format!("failed to build query pool: {e}")))?;
                // Contiguous chunks, one per worker; flat-mapping indexed
                // chunks keeps the original ANN positions in the output.
                pool.install(|| {
                    candidates
                        .par_chunks(chunk_size)
                        .flat_map_iter(|chunk| chunk.iter().map(&resolve))
                        .collect()
                })
            };

        let hits: Vec<QueryHit> = resolved.into_iter().flatten().collect();
        tracing::info!(
            database = %db,
            collection = %coll,
            top_k = request.top_k,
            results = hits.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "query complete"
        );
        Ok(hits)
    }

    /// Resolves one ANN candidate to a document, applying the distance
    /// cutoff and the metadata filter. Any failure drops the candidate.
    fn resolve_candidate(
        &self,
        record: &CollectionRecord,
        request: &QueryRequest,
        label: i64,
        distance: f32,
    ) -> Option<QueryHit> {
        if label < 0 {
            return None;
        }
        let kv = self.catalog.kv();
        let doc_id = kv.get_string(LABEL_TABLE, &label.to_string()).ok()??;
        let row = kv.get(&record.table_uri, doc_id.as_bytes()).ok()??;
        if row.is_empty() {
            return None;
        }
        let document = Document::from_row(&row).ok()?;

        if request.max_distance > 0.0 && distance >= request.max_distance {
            return None;
        }
        if let Some(filter) = &request.filter {
            match matches_filter(&document.metadata, filter) {
                Ok(true) => {}
                Ok(false) | Err(_) => return None,
            }
        }
        Some(QueryHit { document, distance })
    }

    // ── Document CRUD ────────────────────────────────────────────────

    /// Scans every document row of a collection.
    pub fn get_documents(&self, db: &str, coll: &str) -> Result<Vec<Document>> {
        let record = self.catalog.load_collection(db, coll)?;
        let rows = self
            .catalog
            .kv()
            .scan_all(&record.table_uri)
            .map_err(|e| storage("failed to scan collection table", e))?;
        rows.iter().map(|(_, value)| Document::from_row(value)).collect()
    }

    /// Applies a shallow metadata merge to one document. Existing keys are
    /// overwritten, others preserved; content and embedding are immutable.
    pub fn update_document(&self, db: &str, coll: &str, update: DocumentUpdate) -> Result<()> {
        let record = self.catalog.load_collection(db, coll)?;
        if update.document_id.is_empty() {
            return Err(DbError::InvalidInput("document id is empty".into()));
        }

        let kv = self.catalog.kv();
        let row = kv
            .get(&record.table_uri, update.document_id.as_bytes())
            .map_err(|e| storage("failed to get document", e))?
            .ok_or_else(|| DbError::NotFound("document not found".into()))?;
        let mut document = Document::from_row(&row)?;
        for (key, value) in update.updates {
            document.metadata.insert(key, value);
        }
        let updated = document.to_row()?;
        kv.put(&record.table_uri, update.document_id.as_bytes(), &updated)
            .map_err(|e| storage("failed to update document", e))?;

        tracing::info!(
            database = %db,
            collection = %coll,
            document_id = %update.document_id,
            "document updated"
        );
        Ok(())
    }

    /// Deletes documents by id, returning how many existed.
    ///
    /// Only the KV rows and the stats count are touched; the corresponding
    /// vectors and label mappings stay behind and later queries drop them as
    /// unresolvable candidates.
    pub fn delete_documents(&self, db: &str, coll: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Err(DbError::InvalidInput(
                "documents slice cannot be empty".into(),
            ));
        }
        let record = self.catalog.load_collection(db, coll)?;
        let kv = self.catalog.kv();

        let mut deleted = 0usize;
        for id in ids {
            let exists = kv
                .get(&record.table_uri, id.as_bytes())
                .map_err(|e| storage("failed to check document", e))?
                .is_some();
            if exists {
                kv.delete(&record.table_uri, id.as_bytes())
                    .map_err(|e| storage("failed to delete document", e))?;
                deleted += 1;
            }
        }

        if deleted > 0 {
            if let Some(mut stats) = self.catalog.load_stats(&record.ns)? {
                stats.doc_count = (stats.doc_count - deleted as i64).max(0);
                self.catalog.put_stats(&record.ns, &stats)?;
            }
        }

        tracing::info!(
            database = %db,
            collection = %coll,
            deleted,
            "documents deleted"
        );
        Ok(deleted)
    }
}
