//! Manual course import

use axum::{
    Json,
    extract::State as AxumState,
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{auth::StaffAccess, status_for};
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct ManualImportRequest {
    pub repo_location: String,
    #[serde(default)]
    pub repo_branch: Option<String>,
}

/// Spaces and `;` never belong in a repository location
pub fn clean_repo_location(location: &str) -> String {
    location.trim().replace([' ', ';'], "")
}

/// POST /api/gitimport/ - Import a repository and wait for the result
pub async fn import_course(
    _staff: StaffAccess,
    AxumState(state): AxumState<SharedState>,
    Json(request): Json<ManualImportRequest>,
) -> impl IntoResponse {
    let location = clean_repo_location(&request.repo_location);
    let branch = request
        .repo_branch
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty());
    info!("Manual import of {} (branch {:?})", location, branch);

    match state.pipeline.add_repo(&location, None, branch).await {
        Ok(report) => {
            let log = format!("{}\n{}", report.git_log, report.import_log);
            match &report.error {
                None => {
                    let course = report
                        .course_id
                        .as_ref()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| report.repo_dir.clone());
                    (
                        StatusCode::OK,
                        Json(json!({
                            "success": true,
                            "message": format!("Imported {}", course),
                            "log": log,
                        })),
                    )
                }
                Some(e) => (
                    status_for(e.category()),
                    Json(json!({
                        "success": false,
                        "message": e.to_string(),
                        "log": log,
                    })),
                ),
            }
        }
        Err(e) => (
            status_for(e.category()),
            Json(json!({
                "success": false,
                "message": e.to_string(),
                "log": "",
            })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{body_json, test_state};
    use crate::create_router;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn post(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/gitimport/")
            .header("authorization", "Bearer staff")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn strips_spaces_and_semicolons() {
        assert_eq!(
            clean_repo_location(" https://example.com/demo.git; rm -rf / "),
            "https://example.com/demo.gitrm-rf/"
        );
    }

    #[tokio::test]
    async fn bad_url_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path(), None, Some("staff")).await);

        let response = app
            .oneshot(post(json!({"repo_location": "nonsense"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert!(json["message"].as_str().unwrap().starts_with("Non usable git url"));
    }

    #[tokio::test]
    async fn missing_repo_root_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir.path().join("absent"), None, Some("staff")).await;
        let app = create_router(state);

        let response = app
            .oneshot(post(json!({"repo_location": "https://example.com/demo.git"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["message"].as_str().unwrap().contains("git_repo_dir"));
    }

    #[tokio::test]
    async fn clone_failure_reports_log() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path(), None, Some("staff")).await);
        let remote = format!("file://{}/nowhere.git", dir.path().display());

        let response = app
            .oneshot(post(json!({"repo_location": remote, "repo_branch": ""})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "git clone or pull failed!");
    }
}
