//! Core factor reference endpoints (SuperAdmin only)

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use sam_common::Claims;

use super::{tracked, PageParams};
use crate::db::core_factor::{CoreFactorLog, CoreFactorReference};
use crate::db::Page;
use crate::services::orchestrator::{StoreCoreFactorRequest, SuccessResponse};
use crate::{ApiResult, AppState};

/// POST /api/v1/dps/corefactor
///
/// **Request:** `{"file_name": "cf.xlsx", "reference_data": {"IBM": {"power8": "1"}}}`
pub async fn store_core_factor(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<StoreCoreFactorRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    let result = state.orchestrator.store_core_factor(&claims, req).await;
    tracked(&state, result).await.map(Json)
}

/// GET /api/v1/dps/corefactor?page_num=1&page_size=50
pub async fn view_core_factor(
    State(state): State<AppState>,
    claims: Claims,
    Query(page): Query<PageParams>,
) -> ApiResult<Json<Page<CoreFactorReference>>> {
    let result = state
        .orchestrator
        .view_core_factor(&claims, page.page_num, page.page_size)
        .await;
    tracked(&state, result).await.map(Json)
}

/// GET /api/v1/dps/corefactor/logs
pub async fn view_core_factor_logs(
    State(state): State<AppState>,
    claims: Claims,
) -> ApiResult<Json<Vec<CoreFactorLog>>> {
    let result = state.orchestrator.view_core_factor_logs(&claims).await;
    tracked(&state, result).await.map(Json)
}

pub fn core_factor_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/dps/corefactor",
            get(view_core_factor).post(store_core_factor),
        )
        .route("/api/v1/dps/corefactor/logs", get(view_core_factor_logs))
}
