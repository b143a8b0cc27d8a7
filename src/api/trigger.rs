//! Manual pull trigger, for orchestrators and operators

use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::SharedState;
use crate::api::spawn_run;
use crate::run::{PullRun, RunTrigger};

#[derive(Debug, Deserialize)]
pub struct TriggerQuery {
    /// Run inline and return the report instead of queueing
    #[serde(default)]
    pub wait: bool,
}

/// POST /api/pull/{name} - Pull a configured repo
pub async fn trigger_pull(
    AxumState(state): AxumState<SharedState>,
    Path(name): Path<String>,
    Query(params): Query<TriggerQuery>,
) -> Response {
    let Some(repo) = state.config.find_repo(&name) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("Unknown repo '{}'", name)})),
        )
            .into_response();
    };

    let run = PullRun::new(repo.name.clone(), repo.branch().to_string(), RunTrigger::Manual);
    if let Err(e) = state.store.create_run(&run).await {
        error!("Failed to create run in database: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response();
    }
    info!("Created manual run {} for repo '{}'", run.id, repo.name);

    let run_id = run.id.clone();
    let req = repo.to_request(&state.config.alerting);

    let handle = spawn_run(state.clone(), run, req);
    if !params.wait {
        return (StatusCode::ACCEPTED, Json(json!({ "run_id": run_id }))).into_response();
    }

    match handle.await {
        Ok(Ok(report)) => Json(json!({ "run_id": run_id, "report": report })).into_response(),
        Ok(Err(e)) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "run_id": run_id, "error": e.to_string() })),
        )
            .into_response(),
        Err(e) => {
            error!("Run {} task failed: {}", run_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "run_id": run_id, "error": "pull task failed" })),
            )
                .into_response()
        }
    }
}
