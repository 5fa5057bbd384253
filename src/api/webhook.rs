//! Webhook handler for GitHub push events

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::SharedState;
use crate::signature::{SIGNATURE_HEADER_256, SIGNATURE_HEADER_LEGACY, verify};
use crate::webhook::{Decision, RepoDirLookup, WebhookEvent, clean_branch_name, decide};

pub const EVENT_HEADER: &str = "X-GitHub-Event";

fn message(status: StatusCode, msg: impl Into<String>) -> axum::response::Response {
    (status, Json(json!({ "message": msg.into() }))).into_response()
}

/// POST /api/gitreload/ - Re-import a course repository after a push
///
/// The signature is checked against the raw body before anything is parsed.
/// Accepted pushes are imported in the background.
pub async fn handle_gitreload(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER_256)
        .or_else(|| headers.get(SIGNATURE_HEADER_LEGACY))
        .and_then(|v| v.to_str().ok());
    let secret = state.config.github_webhook_key.as_deref().map(str::as_bytes);

    if let Err(failure) = verify(secret, &body, signature) {
        warn!("Webhook rejected: {}", failure);
        return message(StatusCode::FORBIDDEN, failure.to_string());
    }

    let event_type = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let event = match WebhookEvent::from_payload(event_type, &body) {
        Ok(event) => event,
        Err(e) => {
            info!("Could not parse JSON body: {:?}", e);
            return message(StatusCode::BAD_REQUEST, "Invalid JSON payload");
        }
    };
    debug!("{:#?}", &event);

    let lookup = RepoDirLookup::new(&state.config.git_repo_dir);
    let params = match decide(&event, &lookup, &state.config.branch_policy()) {
        Decision::Accept(params) => params,
        Decision::Reject(reason) => {
            warn!("Push for {:?} ignored: {}", event.repository.name, reason);
            return message(StatusCode::BAD_REQUEST, reason.to_string());
        }
    };

    // Configuration and input problems go back to the caller, not the task
    if let Err(e) = state
        .pipeline
        .preflight(&params.remote, params.local_dir.as_deref())
    {
        warn!("Push for {:?} not imported: {}", event.repository.name, e);
        return message(StatusCode::BAD_REQUEST, e.to_string());
    }

    let task_id = Uuid::now_v7().to_string();
    let repo_name = event.repository.name.clone();
    let branch = clean_branch_name(&event.pushed_ref).to_string();
    info!(
        "Import task {} queued for repo '{}' branch '{}'",
        task_id, repo_name, branch
    );

    let pipeline = state.pipeline.clone();
    let spawned_id = task_id.clone();
    tokio::spawn(async move {
        let result = pipeline
            .add_repo(
                &params.remote,
                params.local_dir.as_deref(),
                params.branch.as_deref(),
            )
            .await;
        match result {
            Ok(report) if report.succeeded() => {
                info!("Import task {} finished for {}", spawned_id, report.repo_dir)
            }
            Ok(report) => error!(
                "Import task {} failed for {}: {}",
                spawned_id,
                report.repo_dir,
                report.error.map(|e| e.to_string()).unwrap_or_default()
            ),
            Err(e) => error!("Import task {} could not start: {}", spawned_id, e),
        }
    });

    (
        StatusCode::OK,
        Json(json!({
            "message": format!("Triggered reloading branch: {} of repo: {}", branch, repo_name),
            "task_id": task_id,
        })),
    )
        .into_response()
}
