//! Prometheus metrics recording and background collection.

use emberdb_core::DbService;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Records HTTP request metrics.
pub fn record_request(method: &str, path: &str, status: u16, duration: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];
    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration.as_secs_f64());
}

/// Records a write operation metric.
pub fn record_write_operation(collection: &str, operation: &str) {
    counter!(
        "emberdb_operations_total",
        "collection" => collection.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Records a query operation metric with its result count.
pub fn record_query_operation(collection: &str, results: usize) {
    counter!(
        "emberdb_queries_total",
        "collection" => collection.to_string()
    )
    .increment(1);
    histogram!(
        "emberdb_query_results",
        "collection" => collection.to_string()
    )
    .record(results as f64);
}

/// Updates database- and collection-level Prometheus gauges.
pub fn update_collection_metrics(service: &DbService) {
    let databases = match service.list_databases() {
        Ok(databases) => databases,
        Err(e) => {
            tracing::warn!(error = %e, "metrics refresh failed to list databases");
            return;
        }
    };

    gauge!("emberdb_databases_total").set(databases.len() as f64);
    let mut collections_total = 0usize;

    for db in &databases {
        let collections = match service.list_collections(&db.name) {
            Ok(collections) => collections,
            Err(_) => continue,
        };
        collections_total += collections.len();
        for record in collections {
            if let Ok(Some(stats)) = service.catalog().load_stats(&record.ns) {
                let labels = [("collection", record.ns.clone())];
                gauge!("emberdb_documents_total", &labels).set(stats.doc_count as f64);
                gauge!("emberdb_index_size_bytes", &labels).set(stats.index_size_bytes as f64);
            }
        }
    }
    gauge!("emberdb_collections_total").set(collections_total as f64);
}
