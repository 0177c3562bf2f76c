//! sam-dps library interface
//!
//! Exposes the pipeline for the binary and for integration testing.

pub mod analysis;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod parser;
pub mod queue;
pub mod services;
pub mod storage;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::config::DpsConfig;
use crate::parser::FileParser;
use crate::queue::{ApiWorker, DeferWorker, FileWorker, JobQueue, UploadFinalizer};
use crate::services::{CoreFactorCache, IngestionOrchestrator, RpcTransport};
use crate::storage::Storage;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub orchestrator: IngestionOrchestrator,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(orchestrator: IngestionOrchestrator) -> Self {
        Self {
            db: orchestrator.pool().clone(),
            orchestrator,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::upload_routes())
        .merge(api::core_factor_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Running queue and the orchestrator feeding it
pub struct Pipeline {
    pub queue: JobQueue,
    pub orchestrator: IngestionOrchestrator,
    pub storage: Storage,
}

/// Resume unfinished jobs and start the file, API and defer workers
pub async fn start_pipeline(
    pool: SqlitePool,
    config: &DpsConfig,
    transport: Arc<dyn RpcTransport>,
) -> sam_common::Result<Pipeline> {
    let storage = Storage::new(config.storage.clone());
    let queue = JobQueue::new(pool.clone(), config.queue.clone(), config.database.max_lock_wait_ms);
    queue.resume().await?;

    let finalizer = UploadFinalizer::new(
        pool,
        storage.clone(),
        transport.clone(),
        config.rpc.timeout(),
    );
    let file_worker = FileWorker::new(
        queue.clone(),
        FileParser::new(config.storage.files_location.clone()),
        finalizer.clone(),
    );
    let api_worker = ApiWorker::new(
        queue.clone(),
        transport.clone(),
        finalizer.clone(),
        config.rpc.timeout(),
        config.database.max_lock_wait_ms,
    );
    let defer_worker = DeferWorker::new(queue.clone(), finalizer);

    queue
        .spawn_workers(Arc::new(file_worker), config.workers.max_file_worker)
        .await;
    queue
        .spawn_workers(Arc::new(api_worker), config.workers.max_api_worker)
        .await;
    queue
        .spawn_workers(Arc::new(defer_worker), config.workers.max_defer_worker)
        .await;

    let orchestrator = IngestionOrchestrator::new(
        queue.clone(),
        storage.clone(),
        transport,
        Arc::new(CoreFactorCache::new()),
        &config.rpc,
    );

    Ok(Pipeline {
        queue,
        orchestrator,
        storage,
    })
}
