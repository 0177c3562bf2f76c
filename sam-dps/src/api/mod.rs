//! HTTP API handlers for sam-dps
//!
//! Handlers are thin: they extract the caller's [`sam_common::Claims`] from
//! the forwarded identity headers and delegate to the orchestrator.

pub mod core_factor;
pub mod health;
pub mod uploads;

pub use core_factor::core_factor_routes;
pub use health::health_routes;
pub use uploads::upload_routes;

use serde::Deserialize;

use crate::{ApiError, ApiResult, AppState};

/// `page_num` / `page_size` query parameters; zero means default
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PageParams {
    pub page_num: i64,
    pub page_size: i64,
}

/// Remember server side failures for `/health`
async fn tracked<T>(state: &AppState, result: ApiResult<T>) -> ApiResult<T> {
    if let Err(err @ (ApiError::Internal(_) | ApiError::Common(_))) = &result {
        *state.last_error.write().await = Some(err.to_string());
    }
    result
}
