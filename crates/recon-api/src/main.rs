//! recon-api - HTTP API server for inventory reconciliation

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recon_api::{router, App, AppConfig};
use recon_core::{AssetRepository, JobRecordRepository, ReferenceData};
use recon_db::{create_pool, migrate, MemoryAssetStore, MemoryJobStore, PgJobRecordRepository};
use recon_source::LibreNmsClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "recon_api=debug,recon_engine=debug,recon_jobs=debug,tower_http=debug".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("recon-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false)); // no ANSI in files by default
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = AppConfig::load()?;

    let records: Arc<dyn JobRecordRepository> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = create_pool(url).await?;
            migrate(&pool).await?;
            info!("Using PostgreSQL job-record store");
            Arc::new(PgJobRecordRepository::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; job records are kept in memory");
            Arc::new(MemoryJobStore::new())
        }
    };

    let assets: Arc<dyn AssetRepository> = match config.assets_file.as_deref() {
        Some(path) => {
            info!(path = %path.display(), "Loading asset database snapshot");
            Arc::new(MemoryAssetStore::from_file(path)?)
        }
        None => {
            warn!("No asset snapshot configured; starting with an empty asset database");
            Arc::new(MemoryAssetStore::new(ReferenceData::default()))
        }
    };

    let app = App::build(&config, Arc::new(LibreNmsClient::new()), assets, records).await?;
    let worker = app.worker.start();
    let routes = router(app.state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, routes)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    worker.shutdown().await?;
    Ok(())
}
