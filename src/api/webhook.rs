//! Webhook handler for GitHub push events

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::SharedState;
use crate::api::spawn_run;
use crate::run::{PullRun, RunTrigger};
use crate::utils::{find_matching_repo, verify_github_signature};
use crate::webhook::PushEvent;

/// Handles the GitHub webhook POST request.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Only handle "push" events.
    let event_opt = headers.get("X-GitHub-Event").and_then(|v| v.to_str().ok());
    if event_opt != Some("push") {
        info!("Not push event; Received {:?} event", event_opt);
        return StatusCode::NO_CONTENT.into_response();
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            info!("Could not parse JSON body: {:?}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    debug!("{:#?}", &payload);

    let Some(event) = PushEvent::from_payload(&payload) else {
        error!("No ref or repository.name field in push event payload");
        return StatusCode::BAD_REQUEST.into_response();
    };

    let Some(repo) = find_matching_repo(&state.config, &event.repo_name, &event.branch) else {
        warn!(
            "No matching repo for '{}' and branch '{}', skipping.",
            event.repo_name, event.branch
        );
        return StatusCode::NO_CONTENT.into_response();
    };

    // Per-repo webhook signature validation if a secret is configured
    if let Some(secret) = repo.webhook_secret.as_deref().filter(|_| repo.has_webhook_secret()) {
        let Some(signature) = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
        else {
            error!(
                "Repo '{}' requires webhook secret, but no signature header supplied.",
                repo.name
            );
            return StatusCode::UNAUTHORIZED.into_response();
        };
        if !verify_github_signature(secret, &body, signature) {
            error!("Signature verification failed for repo '{}'!", repo.name);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    {
        let mut rate_limiter = state.rate_limiter.lock().await;
        if rate_limiter.check_rate_limit(
            &repo.name,
            repo.get_rate_limit(),
            repo.get_rate_limit_window(),
        ) {
            warn!(
                "Too many requests for repo {:?} - {:?} requests per {:?} seconds",
                repo.name,
                repo.get_rate_limit(),
                repo.get_rate_limit_window()
            );
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }
    }

    let run = PullRun::new(repo.name.clone(), event.branch.clone(), RunTrigger::Webhook)
        .with_commit(event.commit_sha);
    if let Err(e) = state.store.create_run(&run).await {
        error!("Failed to create run in database: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    info!(
        "Created run {} for repo '{}' branch '{}'",
        run.id, repo.name, event.branch
    );

    let run_id = run.id.clone();
    let req = repo.to_request(&state.config.alerting);
    // Failures are alerted and recorded by the task
    drop(spawn_run(state.clone(), run, req));

    // Return immediately so GitHub's request completes within its timeout
    (StatusCode::ACCEPTED, Json(json!({ "run_id": run_id }))).into_response()
}
