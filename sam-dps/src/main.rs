//! sam-dps - Data Processing Service
//!
//! Ingests inventory uploads: records them, parses them into downstream
//! requests through the job queue, hands transformed global uploads over
//! from the poller and analyses global workbooks before ingestion.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sam_dps::config::{Cli, DpsConfig};
use sam_dps::services::{HttpTransport, Poller, PollerState};
use sam_dps::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = DpsConfig::load(&cli)?;

    info!("Starting sam-dps (Data Processing Service)");
    info!(
        "Version: {} ({}, {} build, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );

    for dir in [
        &config.storage.files_location,
        &config.storage.archive_location,
        &config.storage.rawdata_location,
    ] {
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", dir.display(), e))?;
    }

    info!("Database: {}", config.database.path.display());
    let db_pool = sam_dps::db::init_database_pool(&config.database.path).await?;
    info!("Database connection established");

    let transport = Arc::new(HttpTransport::new(&config.rpc));
    let pipeline = sam_dps::start_pipeline(db_pool, &config, transport).await?;

    let cancel = CancellationToken::new();
    let poller = Poller::new(
        pipeline.orchestrator.clone(),
        pipeline.storage.clone(),
        PollerState::new(),
        config.poller.wait_limit,
        Duration::from_secs(config.poller.interval_secs),
    );
    let poller_task = tokio::spawn(poller.run(cancel.clone()));

    let app = sam_dps::build_router(AppState::new(pipeline.orchestrator.clone()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    cancel.cancel();
    if let Err(e) = poller_task.await {
        tracing::error!(error = %e, "Poller task ended abnormally");
    }
    pipeline.queue.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
