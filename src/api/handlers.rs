//! Core handlers

use axum::{
    Json,
    extract::{Query, State as AxumState},
    response::IntoResponse,
};
use serde_json::json;
use std::collections::HashMap;

use crate::SharedState;

/// Health check. `?format=json` returns server details.
pub async fn root(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if params.get("format").map(|s| s.as_str()) == Some("json") {
        Json(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": state.start_time.elapsed().as_secs(),
            "started_at": state.started_at.to_rfc3339(),
            "repo_root": state.config.git_repo_dir,
            "repo_root_exists": state.config.git_repo_dir.is_dir(),
        }))
        .into_response()
    } else {
        "git_course_sync is running".into_response()
    }
}
