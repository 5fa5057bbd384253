//! HTTP API: the push webhook and the staff endpoints

pub mod auth;
pub mod courses;
pub mod handlers;
pub mod import;
pub mod logs;
pub mod webhook;

use axum::{Router, http::StatusCode, routing};

use crate::SharedState;
use crate::error::ErrorCategory;

pub use auth::StaffAccess;
pub use courses::get_course_details;
pub use handlers::root;
pub use import::import_course;
pub use logs::{get_log, get_logs};
pub use webhook::handle_gitreload;

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/api/gitreload/", routing::post(handle_gitreload))
        .route("/api/gitcoursedetails/", routing::get(get_course_details))
        .route("/api/gitlogs/", routing::get(get_logs))
        .route("/api/gitlogs/{id}", routing::get(get_log))
        .route("/api/gitimport/", routing::post(import_course))
        .with_state(state)
}

pub(crate) fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::ConfigurationMissing | ErrorCategory::InputInvalid => {
            StatusCode::BAD_REQUEST
        }
        ErrorCategory::AuthenticationFailed => StatusCode::FORBIDDEN,
        ErrorCategory::VersionControlFailed => StatusCode::BAD_GATEWAY,
        ErrorCategory::ImporterFailed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::db::{SqlImportLogStore, init_memory_db};
    use crate::{AppState, SharedState, SysadminConfig, build_pipeline};
    use axum::body::to_bytes;
    use axum::response::Response;
    use std::path::Path;
    use std::sync::Arc;

    pub async fn test_state(
        repo_root: &Path,
        webhook_key: Option<&str>,
        admin_token: Option<&str>,
    ) -> SharedState {
        let config = SysadminConfig {
            git_repo_dir: repo_root.to_path_buf(),
            github_webhook_key: webhook_key.map(String::from),
            admin_token: admin_token.map(String::from),
            git_timeout_secs: 30,
            ..SysadminConfig::default()
        };
        let store = SqlImportLogStore::new(init_memory_db().await.unwrap());
        let pipeline = build_pipeline(&config, store);
        Arc::new(AppState::new(config, pipeline))
    }

    pub async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_state;
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_check_answers() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path(), None, None).await);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"git_course_sync is running");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/?format=json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = super::test_support::body_json(response).await;
        assert_eq!(json["repo_root_exists"], true);
    }

    #[test]
    fn categories_map_to_statuses() {
        assert_eq!(status_for(ErrorCategory::InputInvalid), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorCategory::ConfigurationMissing),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(ErrorCategory::ImporterFailed),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
