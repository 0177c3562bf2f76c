//! Work done once an upload reaches a terminal status

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::db::uploads;
use crate::models::requests::DashboardUpdateRequest;
use crate::models::UploadStatus;
use crate::services::rpc::{RpcError, RpcMethod, RpcTransport};
use crate::storage::{archive_quietly, Storage};

/// Archives finished files and rolls global uploads up
#[derive(Clone)]
pub struct UploadFinalizer {
    pool: SqlitePool,
    storage: Storage,
    transport: Arc<dyn RpcTransport>,
    timeout: Duration,
}

impl UploadFinalizer {
    pub fn new(
        pool: SqlitePool,
        storage: Storage,
        transport: Arc<dyn RpcTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            storage,
            transport,
            timeout,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub async fn finalize(
        &self,
        upload_id: i64,
        file_name: &str,
        global_file_id: Option<i64>,
        status: UploadStatus,
    ) {
        tracing::info!(upload_id, file_name, status = status.as_str(), "Upload finished");
        archive_quietly(&self.storage, upload_id, file_name);

        if let Some(global_id) = global_file_id {
            self.rollup(global_id).await;
        }
    }

    async fn rollup(&self, global_id: i64) {
        let status = match uploads::rollup_global(&self.pool, global_id).await {
            Ok(Some(status)) => status,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(global_file_id = global_id, error = %e, "Global rollup failed");
                return;
            }
        };
        tracing::info!(global_file_id = global_id, status = status.as_str(), "Global upload finished");

        if status == UploadStatus::Failed {
            return;
        }
        let scope = match uploads::get_upload(&self.pool, global_id).await {
            Ok(Some(global)) => global.scope,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(global_file_id = global_id, error = %e, "Cannot load global upload");
                return;
            }
        };
        if let Err(e) = self.request_dashboard_update(&scope).await {
            tracing::warn!(scope = %scope, error = %e, "Dashboard update request failed");
        }
    }

    /// Ask the product service to recompute the scope's dashboard
    pub async fn request_dashboard_update(&self, scope: &str) -> Result<(), RpcError> {
        let body = serde_json::to_value(DashboardUpdateRequest {
            scope: scope.to_string(),
        })
        .map_err(|e| RpcError::Unavailable(e.to_string()))?;
        self.transport
            .invoke(RpcMethod::CreateDashboardUpdateJob, &body, self.timeout)
            .await?;
        tracing::info!(scope, "Dashboard update requested");
        Ok(())
    }
}
