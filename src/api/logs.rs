//! Import log API endpoints

use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::auth::StaffAccess;
use crate::SharedState;
use crate::db::ImportLog;

pub const LOGS_PAGE_SIZE: i64 = 10;

/// Query parameters for import log listing
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Only records of this course
    pub course_id: Option<String>,
    /// 1-based page; anything unparsable selects the first page
    pub page: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<ImportLog>,
    pub course_id: Option<String>,
    pub page: i64,
    pub num_pages: i64,
    pub total: i64,
}

/// Clamps the requested page into `[1, num_pages]`
fn resolve_page(requested: Option<&str>, total: i64) -> (i64, i64) {
    let num_pages = ((total + LOGS_PAGE_SIZE - 1) / LOGS_PAGE_SIZE).max(1);
    let page = requested
        .and_then(|p| p.trim().parse::<i64>().ok())
        .unwrap_or(1)
        .clamp(1, num_pages);
    (page, num_pages)
}

/// GET /api/gitlogs/ - Paginated import logs, newest first
pub async fn get_logs(
    _staff: StaffAccess,
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<LogsQuery>,
) -> impl IntoResponse {
    let store = state.pipeline.store();
    let course_id = params.course_id.filter(|c| !c.trim().is_empty());

    let total = match store.count(course_id.as_deref()).await {
        Ok(total) => total,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };
    let (page, num_pages) = resolve_page(params.page.as_deref(), total);

    match store
        .list(
            course_id.as_deref(),
            LOGS_PAGE_SIZE,
            (page - 1) * LOGS_PAGE_SIZE,
        )
        .await
    {
        Ok(logs) => Json(LogsResponse {
            logs,
            course_id,
            page,
            num_pages,
            total,
        })
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// GET /api/gitlogs/{id} - A single import log record
pub async fn get_log(
    _staff: StaffAccess,
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.pipeline.store().get(id).await {
        Ok(Some(log)) => Json(log).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Import log not found"})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}
