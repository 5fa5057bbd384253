//! Course repository details

use axum::{
    Json,
    extract::{Query, State as AxumState},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

use super::auth::StaffAccess;
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct CourseDetailsQuery {
    #[serde(rename = "courseDir")]
    pub course_dir: Option<String>,
}

/// GET /api/gitcoursedetails/ - Latest commit of a course working copy
///
/// Answers `{}` when the directory can't be located.
pub async fn get_course_details(
    _staff: StaffAccess,
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<CourseDetailsQuery>,
) -> impl IntoResponse {
    let Some(course_dir) = params.course_dir.filter(|d| !d.trim().is_empty()) else {
        return Json(json!({}));
    };

    match state.pipeline.git().commit_details(course_dir.trim()).await {
        Some(details) => Json(json!({
            "commit": details.commit,
            "author": details.author,
            "date": details.date,
        })),
        None => Json(json!({})),
    }
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{body_json, test_state};
    use crate::create_router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn requires_staff_token() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), None, Some("staff")).await;
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(get("/api/gitcoursedetails/?courseDir=demo", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(get("/api/gitcoursedetails/?courseDir=demo", Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_directory_gives_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), None, Some("staff")).await;
        let app = create_router(state);

        for uri in [
            "/api/gitcoursedetails/?courseDir=missing",
            "/api/gitcoursedetails/?courseDir=..",
            "/api/gitcoursedetails/",
        ] {
            let response = app.clone().oneshot(get(uri, Some("staff"))).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await, serde_json::json!({}));
        }
    }
}
