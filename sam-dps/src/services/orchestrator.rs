//! Ingestion service layer
//!
//! Entry point for every caller-facing DPS operation. Each operation checks
//! the caller's claims first, then works against the database, the job
//! queue and the downstream services.
//!
//! Single flight per scope: an upload row is only written while no deletion
//! is running, and a deletion row only while no upload is active. Both
//! checks are one conditional insert each (see `db::uploads` and
//! `db::deletions`).

use futures::future::join_all;
use sam_common::Claims;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::analysis::{AnalysisEngine, AnalysisResponse};
use crate::config::RpcConfig;
use crate::db::core_factor::{self, CoreFactorLog, CoreFactorReference};
use crate::db::deletions::{self, Admission};
use crate::db::jobs::{self, FailedRecord};
use crate::db::uploads::{self, UploadListQuery};
use crate::db::Page;
use crate::error::{ApiError, ApiResult};
use crate::models::requests::DropScopeRequest;
use crate::models::{
    DataType, DeletionStatus, DeletionType, FileJobPayload, JobType, NewJob, NewUpload, ScopeType,
    UploadRecord, UploadStatus,
};
use crate::parser::global_id_from_name;
use crate::queue::{JobQueue, UploadFinalizer};
use crate::services::core_factor_cache::CoreFactorCache;
use crate::services::rpc::{RpcMethod, RpcTransport};
use crate::storage::Storage;

/// Uploader name used for files delivered by the transformation pipeline
pub const NIFI_USER: &str = "Nifi";

const DEFAULT_FAILED_PAGE_SIZE: i64 = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyUploadRequest {
    pub scope: String,
    /// `data`, `metadata` or `globaldata`; anything else is data
    #[serde(rename = "type", default)]
    pub data_type: String,
    #[serde(default)]
    pub uploaded_by: String,
    #[serde(default)]
    pub scope_type: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub is_delete_old_inventory: bool,
    #[serde(default)]
    pub global_file_id: Option<i64>,
    #[serde(default)]
    pub analysis_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifyUploadResponse {
    pub success: bool,
    /// File name to upload id, filled for global uploads
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_upload_id: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteInventoryRequest {
    pub scope: String,
    pub deletion_type: DeletionType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataAnalysisRequest {
    pub scope: String,
    pub file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreCoreFactorRequest {
    #[serde(default)]
    pub file_name: String,
    /// manufacturer -> model -> factor
    pub reference_data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    fn ok() -> Self {
        Self { success: true }
    }
}

fn require_scope(claims: &Claims, scope: &str) -> ApiResult<()> {
    if claims.has_scope(scope) {
        Ok(())
    } else {
        tracing::warn!(user = %claims.user_id, scope, "Scope not granted to caller");
        Err(ApiError::PermissionDenied("ScopeValidationError".into()))
    }
}

fn require_super_admin(claims: &Claims) -> ApiResult<()> {
    if claims.is_super_admin() {
        Ok(())
    } else {
        Err(ApiError::PermissionDenied("UnAuthorisedUser".into()))
    }
}

/// Flatten `{manufacturer: {model: factor}}` into reference rows
pub fn flatten_reference_data(data: &serde_json::Value) -> Option<Vec<CoreFactorReference>> {
    let manufacturers = data.as_object()?;
    let mut references = Vec::new();
    for (manufacturer, models) in manufacturers {
        for (model, factor) in models.as_object()? {
            let core_factor = match factor {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => return None,
            };
            references.push(CoreFactorReference {
                manufacturer: manufacturer.clone(),
                model: model.clone(),
                core_factor,
            });
        }
    }
    Some(references)
}

/// DPS operations
#[derive(Clone)]
pub struct IngestionOrchestrator {
    pool: SqlitePool,
    queue: JobQueue,
    transport: Arc<dyn RpcTransport>,
    finalizer: UploadFinalizer,
    core_factors: Arc<CoreFactorCache>,
    engine: AnalysisEngine,
    rpc_timeout: Duration,
    equipment_drop_timeout: Duration,
}

impl IngestionOrchestrator {
    pub fn new(
        queue: JobQueue,
        storage: Storage,
        transport: Arc<dyn RpcTransport>,
        core_factors: Arc<CoreFactorCache>,
        rpc: &RpcConfig,
    ) -> Self {
        let pool = queue.pool().clone();
        let finalizer =
            UploadFinalizer::new(pool.clone(), storage.clone(), transport.clone(), rpc.timeout());
        let engine = AnalysisEngine::new(pool.clone(), storage, core_factors.clone());
        Self {
            pool,
            queue,
            transport,
            finalizer,
            core_factors,
            engine,
            rpc_timeout: rpc.timeout(),
            equipment_drop_timeout: rpc.equipment_drop_timeout(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record uploaded files and queue them for parsing
    ///
    /// Global files are only recorded; the poller picks them up once their
    /// transformed output exists.
    pub async fn notify_upload(
        &self,
        claims: &Claims,
        req: NotifyUploadRequest,
    ) -> ApiResult<NotifyUploadResponse> {
        require_scope(claims, &req.scope)?;

        let data_type = DataType::parse(&req.data_type).unwrap_or(DataType::Data);
        let scope_type = req
            .scope_type
            .as_deref()
            .and_then(ScopeType::parse)
            .unwrap_or_default();
        let files: Vec<&str> = req
            .files
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .collect();

        if req.uploaded_by == NIFI_USER {
            self.check_active_global(&req.scope, req.global_file_id, &files)
                .await?;
        }

        if data_type == DataType::GlobalData && req.is_delete_old_inventory {
            tracing::info!(scope = %req.scope, "Deleting previous inventory before global upload");
            let deletion = DeleteInventoryRequest {
                scope: req.scope.clone(),
                deletion_type: DeletionType::Full,
            };
            if let Err(e) = self.delete_inventory(claims, deletion).await {
                tracing::error!(scope = %req.scope, error = %e, "Old inventory deletion failed");
                return Err(ApiError::Internal("InventoryDeletionFailed".into()));
            }
        }

        let mut response = NotifyUploadResponse {
            success: true,
            file_upload_id: BTreeMap::new(),
        };

        for file in files {
            let global_file_id = global_id_from_name(file).or(req.global_file_id);
            let upload = NewUpload {
                scope: req.scope.clone(),
                data_type,
                file_name: file.to_string(),
                uploaded_by: req.uploaded_by.clone(),
                global_file_id: if data_type == DataType::GlobalData {
                    None
                } else {
                    global_file_id
                },
                scope_type,
                analysis_id: req.analysis_id.clone(),
            };

            let upload_id = uploads::insert_upload_if_no_deletion(&self.pool, &upload)
                .await?
                .ok_or_else(|| {
                    tracing::warn!(scope = %req.scope, file, "Upload refused, deletion running");
                    ApiError::FailedPrecondition("DeletionInProgress".into())
                })?;
            tracing::info!(
                upload_id,
                scope = %req.scope,
                file,
                data_type = data_type.as_str(),
                "Upload recorded"
            );

            if data_type == DataType::GlobalData {
                response.file_upload_id.insert(file.to_string(), upload_id);
                continue;
            }

            let payload = FileJobPayload {
                upload_id,
                scope: req.scope.clone(),
                file_name: file.to_string(),
                data_type,
                global_file_id: upload.global_file_id,
            };
            let data = serde_json::to_value(&payload).map_err(sam_common::Error::from)?;
            if let Err(e) = self.queue.push(NewJob::pending(JobType::File, data)).await {
                tracing::error!(upload_id, file, error = %e, "Failed to queue file job");
                uploads::update_status(&self.pool, upload_id, UploadStatus::Failed, "InternalError")
                    .await?;
            }
        }

        Ok(response)
    }

    /// Transformed files must belong to the scope's latest global upload
    async fn check_active_global(
        &self,
        scope: &str,
        requested: Option<i64>,
        files: &[&str],
    ) -> ApiResult<()> {
        let active = uploads::latest_global_for_scope(&self.pool, scope)
            .await?
            .map(|g| g.upload_id);

        for file in files {
            let linked = global_id_from_name(file).or(requested);
            if linked.is_none() || linked != active {
                tracing::warn!(
                    scope,
                    file,
                    linked = ?linked,
                    active = ?active,
                    "Transformed file does not belong to active global upload"
                );
                return Err(ApiError::FailedPrecondition(
                    "FileNotLinkedToActiveGlobalFile".into(),
                ));
            }
        }
        Ok(())
    }

    /// Drop a scope's inventory in the downstream services
    pub async fn delete_inventory(
        &self,
        claims: &Claims,
        req: DeleteInventoryRequest,
    ) -> ApiResult<SuccessResponse> {
        require_scope(claims, &req.scope)?;
        let scope = req.scope.as_str();
        let deletion_type = req.deletion_type;

        let deletion_id =
            match deletions::insert_deletion_if_idle(&self.pool, scope, deletion_type, &claims.user_id)
                .await?
            {
                Admission::Admitted(id) => id,
                Admission::InjectionActive => {
                    tracing::warn!(scope, "Deletion refused, injection running");
                    return Err(ApiError::FailedPrecondition("InjectionInProgress".into()));
                }
                Admission::DeletionActive => {
                    tracing::warn!(scope, "Deletion refused, another deletion running");
                    return Err(ApiError::FailedPrecondition("DeletionInProgress".into()));
                }
            };
        tracing::info!(deletion_id, scope, deletion_type = deletion_type.as_str(), "Deletion started");

        let body = serde_json::to_value(DropScopeRequest {
            scope: scope.to_string(),
            deletion_type: Some(deletion_type.as_str().to_string()),
        })
        .map_err(sam_common::Error::from)?;

        let calls = self.drop_methods(deletion_type).into_iter().map(|(method, timeout)| {
            let transport = self.transport.clone();
            let body = &body;
            async move { (method, transport.invoke(method, body, timeout).await) }
        });
        let failures: Vec<String> = join_all(calls)
            .await
            .into_iter()
            .filter_map(|(method, result)| {
                result
                    .err()
                    .map(|e| format!("{} failed: {}", method.name(), e))
            })
            .collect();

        if !failures.is_empty() {
            let reason = failures.join("; ");
            tracing::error!(deletion_id, scope, reason = %reason, "Deletion failed");
            deletions::set_deletion_status(&self.pool, deletion_id, DeletionStatus::Failed, &reason)
                .await?;
            return Err(ApiError::Internal("InternalError".into()));
        }

        deletions::set_deletion_status(&self.pool, deletion_id, DeletionStatus::Success, "").await?;
        tracing::info!(deletion_id, scope, "Deletion finished");

        if deletion_type != DeletionType::AcqRights {
            if let Err(e) = self.finalizer.request_dashboard_update(scope).await {
                tracing::warn!(scope, error = %e, "Dashboard update request failed");
            }
        }
        Ok(SuccessResponse::ok())
    }

    fn drop_methods(&self, deletion_type: DeletionType) -> Vec<(RpcMethod, Duration)> {
        match deletion_type {
            DeletionType::AcqRights => vec![(RpcMethod::DropProductData, self.rpc_timeout)],
            DeletionType::Park | DeletionType::Full => vec![
                (RpcMethod::DropApplicationData, self.rpc_timeout),
                (RpcMethod::DropEquipmentData, self.equipment_drop_timeout),
                (RpcMethod::DropProductData, self.rpc_timeout),
            ],
        }
    }

    /// Pre-ingestion analysis of a global workbook
    pub async fn data_analysis(
        &self,
        claims: &Claims,
        req: DataAnalysisRequest,
    ) -> ApiResult<AnalysisResponse> {
        require_scope(claims, &req.scope)?;
        Ok(self.engine.analyze(&req.scope, &req.file).await)
    }

    pub async fn list_uploads(
        &self,
        claims: &Claims,
        scope: &str,
        data_type: DataType,
        query: &UploadListQuery,
    ) -> ApiResult<Page<UploadRecord>> {
        require_scope(claims, scope)?;
        let page = uploads::list_uploads(&self.pool, scope, data_type, query).await?;
        if data_type == DataType::GlobalData && page.total_records == 0 {
            return Err(ApiError::NotFound("NoContent".into()));
        }
        Ok(page)
    }

    /// Records rejected while ingesting an upload
    pub async fn list_failed_records(
        &self,
        claims: &Claims,
        upload_id: i64,
        page_num: i64,
        page_size: i64,
    ) -> ApiResult<Page<FailedRecord>> {
        let upload = uploads::get_upload(&self.pool, upload_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("upload {}", upload_id)))?;
        require_scope(claims, &upload.scope)?;

        let page_size = if page_size <= 0 { DEFAULT_FAILED_PAGE_SIZE } else { page_size };
        let page_num = page_num.max(1);
        Ok(jobs::list_failed_records(&self.pool, upload_id, page_num, page_size).await?)
    }

    /// Replace the core factor reference table
    pub async fn store_core_factor(
        &self,
        claims: &Claims,
        req: StoreCoreFactorRequest,
    ) -> ApiResult<SuccessResponse> {
        require_super_admin(claims)?;
        let references = flatten_reference_data(&req.reference_data).ok_or_else(|| {
            tracing::error!(file_name = %req.file_name, "Reference data is not manufacturer -> model -> factor");
            ApiError::BadRequest("ParsingError".into())
        })?;

        core_factor::replace_references(&self.pool, &references, &req.file_name).await?;
        self.core_factors.uncache().await;
        tracing::info!(
            file_name = %req.file_name,
            references = references.len(),
            "Core factor references replaced"
        );
        Ok(SuccessResponse::ok())
    }

    pub async fn view_core_factor(
        &self,
        claims: &Claims,
        page_num: i64,
        page_size: i64,
    ) -> ApiResult<Page<CoreFactorReference>> {
        require_super_admin(claims)?;
        Ok(core_factor::page_references(&self.pool, page_num, page_size).await?)
    }

    pub async fn view_core_factor_logs(&self, claims: &Claims) -> ApiResult<Vec<CoreFactorLog>> {
        require_super_admin(claims)?;
        Ok(core_factor::list_logs(&self.pool).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reference_data_is_flattened() {
        let data = json!({
            "IBM": {"power 8": "1", "default": 0.75},
            "default": {"": "1"}
        });
        let mut references = flatten_reference_data(&data).unwrap();
        references.sort_by(|a, b| (&a.manufacturer, &a.model).cmp(&(&b.manufacturer, &b.model)));

        assert_eq!(references.len(), 3);
        assert_eq!(references[0].manufacturer, "IBM");
        assert_eq!(references[0].model, "default");
        assert_eq!(references[0].core_factor, "0.75");
        assert_eq!(references[2].manufacturer, "default");
    }

    #[test]
    fn malformed_reference_data_is_rejected() {
        assert!(flatten_reference_data(&json!(["IBM"])).is_none());
        assert!(flatten_reference_data(&json!({"IBM": "1"})).is_none());
        assert!(flatten_reference_data(&json!({"IBM": {"x": true}})).is_none());
    }

    #[test]
    fn notify_request_defaults() {
        let req: NotifyUploadRequest =
            serde_json::from_value(json!({"scope": "S1", "type": "data", "files": ["a.csv"]}))
                .unwrap();
        assert_eq!(req.files, vec!["a.csv"]);
        assert!(!req.is_delete_old_inventory);
        assert!(req.global_file_id.is_none());
    }
}
