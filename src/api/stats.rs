//! Server status endpoint

use axum::{
    Json,
    extract::State as AxumState,
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use crate::SharedState;
use crate::error::PullError;
use crate::run::{PullRun, RunStatus};

struct RunCounts {
    current: Option<PullRun>,
    queued: i64,
    success: i64,
    failed: i64,
}

async fn run_counts(state: &SharedState) -> Result<RunCounts, PullError> {
    Ok(RunCounts {
        current: state.store.get_current_run().await?,
        queued: state.store.count_runs(RunStatus::Queued).await?,
        success: state.store.count_runs(RunStatus::Success).await?,
        failed: state.store.count_runs(RunStatus::Failed).await?,
    })
}

/// GET /status - Server info and run counts
pub async fn status(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    let counts = match run_counts(&state).await {
        Ok(counts) => counts,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    Json(json!({
        "server": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        },
        "runs": {
            "current": counts.current,
            "queued": counts.queued,
            "success": counts.success,
            "failed": counts.failed,
        },
        "config": {
            "total_repos": state.config.repo.len(),
        }
    }))
    .into_response()
}
