//! Run history endpoints

use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::SharedState;
use crate::run::{PullRun, RunStatus};

/// Query parameters for run listing
#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    /// Filter by repo name
    pub repo: Option<String>,
    /// Filter by status (queued, running, success, failed)
    pub status: Option<String>,
    /// Number of items (default: 50, max: 100)
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RunsResponse {
    pub runs: Vec<PullRun>,
    pub total: usize,
    pub limit: i64,
}

/// GET /api/runs - Recent runs with filters
pub async fn get_runs(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<RunsQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50).clamp(1, 100);

    let status = match params.status.as_deref() {
        None => None,
        Some(s) => match RunStatus::parse(s) {
            Some(status) => Some(status),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "Invalid status. Use: queued, running, success, failed"})),
                )
                    .into_response();
            }
        },
    };

    match state
        .store
        .list_runs(params.repo.as_deref(), status, limit)
        .await
    {
        Ok(runs) => Json(RunsResponse {
            total: runs.len(),
            runs,
            limit,
        })
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// GET /api/runs/{id} - Get a specific run by ID
pub async fn get_run(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_run(&id).await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Run not found"})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}
