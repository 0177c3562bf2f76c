//! Upload, analysis and inventory endpoints
//!
//! - `POST /api/v1/dps/notify`
//! - `POST /api/v1/dps/analysis`
//! - `DELETE /api/v1/dps/inventory`
//! - `GET /api/v1/dps/uploads/{data,metadata,globaldata}?scope=..`
//! - `GET /api/v1/dps/uploads/:upload_id/failed`

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use sam_common::Claims;
use serde::Deserialize;

use super::{tracked, PageParams};
use crate::analysis::AnalysisResponse;
use crate::db::jobs::FailedRecord;
use crate::db::uploads::UploadListQuery;
use crate::db::Page;
use crate::models::{DataType, UploadRecord};
use crate::services::orchestrator::{
    DataAnalysisRequest, DeleteInventoryRequest, NotifyUploadRequest, NotifyUploadResponse,
    SuccessResponse,
};
use crate::{ApiResult, AppState};

/// Query string of the upload listings
#[derive(Debug, Deserialize)]
pub struct ListUploadsParams {
    pub scope: String,
    #[serde(default)]
    pub page_num: i64,
    #[serde(default)]
    pub page_size: i64,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl ListUploadsParams {
    fn query(&self) -> UploadListQuery {
        UploadListQuery {
            page_num: self.page_num,
            page_size: self.page_size,
            sort_by: self.sort_by.clone(),
            sort_order: self.sort_order.clone(),
        }
    }
}

pub async fn notify_upload(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<NotifyUploadRequest>,
) -> ApiResult<Json<NotifyUploadResponse>> {
    let result = state.orchestrator.notify_upload(&claims, req).await;
    tracked(&state, result).await.map(Json)
}

/// Always 200 once authorised; the outcome is in `status`
pub async fn data_analysis(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<DataAnalysisRequest>,
) -> ApiResult<Json<AnalysisResponse>> {
    let result = state.orchestrator.data_analysis(&claims, req).await;
    tracked(&state, result).await.map(Json)
}

pub async fn delete_inventory(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<DeleteInventoryRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    let result = state.orchestrator.delete_inventory(&claims, req).await;
    tracked(&state, result).await.map(Json)
}

async fn list(
    state: AppState,
    claims: Claims,
    data_type: DataType,
    params: ListUploadsParams,
) -> ApiResult<Json<Page<UploadRecord>>> {
    let result = state
        .orchestrator
        .list_uploads(&claims, &params.scope, data_type, &params.query())
        .await;
    tracked(&state, result).await.map(Json)
}

pub async fn list_upload_data(
    State(state): State<AppState>,
    claims: Claims,
    Query(params): Query<ListUploadsParams>,
) -> ApiResult<Json<Page<UploadRecord>>> {
    list(state, claims, DataType::Data, params).await
}

pub async fn list_upload_metadata(
    State(state): State<AppState>,
    claims: Claims,
    Query(params): Query<ListUploadsParams>,
) -> ApiResult<Json<Page<UploadRecord>>> {
    list(state, claims, DataType::Metadata, params).await
}

pub async fn list_upload_globaldata(
    State(state): State<AppState>,
    claims: Claims,
    Query(params): Query<ListUploadsParams>,
) -> ApiResult<Json<Page<UploadRecord>>> {
    list(state, claims, DataType::GlobalData, params).await
}

pub async fn list_failed_records(
    State(state): State<AppState>,
    claims: Claims,
    Path(upload_id): Path<i64>,
    Query(page): Query<PageParams>,
) -> ApiResult<Json<Page<FailedRecord>>> {
    let result = state
        .orchestrator
        .list_failed_records(&claims, upload_id, page.page_num, page.page_size)
        .await;
    tracked(&state, result).await.map(Json)
}

pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/dps/notify", post(notify_upload))
        .route("/api/v1/dps/analysis", post(data_analysis))
        .route("/api/v1/dps/inventory", delete(delete_inventory))
        .route("/api/v1/dps/uploads/data", get(list_upload_data))
        .route("/api/v1/dps/uploads/metadata", get(list_upload_metadata))
        .route("/api/v1/dps/uploads/globaldata", get(list_upload_globaldata))
        .route("/api/v1/dps/uploads/:upload_id/failed", get(list_failed_records))
}
