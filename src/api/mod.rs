//! HTTP handlers for the `serve` mode

pub mod runs;
pub mod stats;
pub mod trigger;
pub mod webhook;

use axum::{Router, routing};
use tokio::task::JoinHandle;
use tracing::info;

use crate::SharedState;
use crate::error::Result;
use crate::executor::{PullReport, PullRequest};
use crate::run::PullRun;

pub use runs::{get_run, get_runs};
pub use stats::status;
pub use trigger::trigger_pull;
pub use webhook::handle_webhook;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/webhook", routing::post(handle_webhook))
        .route("/api/pull/{name}", routing::post(trigger_pull))
        .route("/api/runs", routing::get(get_runs))
        .route("/api/runs/{id}", routing::get(get_run))
        .route("/status", routing::get(status))
        .with_state(state)
}

/// Run a queued pull in the background. Only one pull runs at a time.
///
/// The task owns the run, so it is completed even if the caller stops waiting.
pub(crate) fn spawn_run(
    state: SharedState,
    run: PullRun,
    req: PullRequest,
) -> JoinHandle<Result<PullReport>> {
    tokio::spawn(async move {
        let _guard = state.execution_lock.lock().await;
        info!(
            "Run {} - starting pull of '{}' branch '{}'",
            run.id, run.repo_name, run.branch
        );
        state.executor.execute_recorded(&state.store, run, &req).await
    })
}
