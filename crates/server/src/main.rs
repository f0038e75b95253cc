use clap::Parser;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use emberdb_core::config;
use emberdb_core::kv::KvEngine;
use emberdb_core::DbService;
use emberdb_server::api::handlers::AppState;
use emberdb_server::api::{create_router, metrics};

#[derive(Parser)]
#[command(name = "emberdb", about = "Hybrid vector-document database")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Directory for the KV engine environment
    #[arg(long, env = "EMBERDB_DATA_DIR", default_value = config::DEFAULT_DATA_DIR)]
    data_dir: String,

    /// Directory for per-collection ANN index files
    #[arg(long, env = "EMBERDB_VECTORS_DIR", default_value = config::DEFAULT_VECTORS_DIR)]
    vectors_dir: String,

    /// Maximum number of ANN indexes kept in memory
    #[arg(long, default_value_t = config::INDEX_CACHE_CAPACITY)]
    index_cache_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(
                    "emberdb_server=info"
                        .parse()
                        .expect("valid directive literal"),
                )
                .add_directive(
                    "emberdb_core=info"
                        .parse()
                        .expect("valid directive literal"),
                ),
        )
        .init();

    let args = Args::parse();

    if args.port == 0 {
        eprintln!("Error: port must be > 0");
        std::process::exit(1);
    }

    for dir in [&args.data_dir, &args.vectors_dir] {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Error: failed to create directory '{dir}': {e}");
            std::process::exit(1);
        }
    }

    let kv = match KvEngine::open(std::path::Path::new(&args.data_dir)) {
        Ok(kv) => Arc::new(kv),
        Err(e) => {
            eprintln!("Error: failed to open KV engine in '{}': {e}", args.data_dir);
            std::process::exit(1);
        }
    };

    let service = match DbService::new(kv, &args.vectors_dir, args.index_cache_capacity) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            eprintln!("Error: failed to initialize database service: {e}");
            std::process::exit(1);
        }
    };

    let prometheus_handle =
        metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        service: Arc::clone(&service),
        prometheus_handle,
        start_time: Instant::now(),
    };

    let app = create_router(state);
    let addr = format!("0.0.0.0:{}", args.port);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        data_dir = %args.data_dir,
        vectors_dir = %args.vectors_dir,
        index_cache_capacity = args.index_cache_capacity,
        "emberdb ready"
    );

    // Background collection gauge refresh.
    let metrics_service = Arc::clone(&service);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(config::METRICS_REFRESH_SECS));
        loop {
            interval.tick().await;
            let service = Arc::clone(&metrics_service);
            let _ = tokio::task::spawn_blocking(move || {
                metrics::update_collection_metrics(&service);
            })
            .await;
        }
    });

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error: failed to listen on {addr}: {e}");
            std::process::exit(1);
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await?;

    tracing::info!("flushing index cache before exit");
    if let Err(e) = service.close() {
        tracing::error!(error = %e, "failed to flush index cache on shutdown");
    }

    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    tracing::info!("Shutting down gracefully, draining in-flight requests...");
}
