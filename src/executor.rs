//! Pull a repository with a deploy key and report the outcome to Slack.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::alert::{AlertDecision, AlertManager};
use crate::db::SqlStore;
use crate::error::{PullError, Result};
use crate::git;
use crate::run::{PullRun, RunStatus};
use crate::slack::{MAX_OUTPUT_CHARS, SlackNotifier, truncate_chars};
use crate::ssh_key::{self, DeployKey};
use crate::state::AlertStateStore;
use crate::{DEFAULT_BRANCH, DEFAULT_PIPELINE_UUID, DEFAULT_SSH_DIR, DEFAULT_SUPPRESSION_HOURS};

/// Longest error text used to tell one failure from another.
const ERROR_SIGNATURE_CHARS: usize = 500;

/// Everything needed for one pull.
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub repo_path: PathBuf,
    pub git_url: String,
    pub branch: String,
    /// Literal key material. When absent, `{workspace_name}_SSHKEY` is read.
    pub ssh_key: Option<String>,
    pub workspace_name: Option<String>,
    pub pipeline_uuid: String,
    pub suppression_hours: u32,
    pub key_filename: Option<String>,
    pub ssh_dir: PathBuf,
}

impl PullRequest {
    pub fn new(repo_path: impl Into<PathBuf>, git_url: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            git_url: git_url.into(),
            branch: DEFAULT_BRANCH.to_string(),
            ssh_key: None,
            workspace_name: None,
            pipeline_uuid: DEFAULT_PIPELINE_UUID.to_string(),
            suppression_hours: DEFAULT_SUPPRESSION_HOURS,
            key_filename: None,
            ssh_dir: PathBuf::from(DEFAULT_SSH_DIR),
        }
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn ssh_key(mut self, key: impl Into<String>) -> Self {
        self.ssh_key = Some(key.into());
        self
    }

    pub fn workspace(mut self, workspace_name: impl Into<String>) -> Self {
        self.workspace_name = Some(workspace_name.into());
        self
    }

    pub fn pipeline_uuid(mut self, pipeline_uuid: impl Into<String>) -> Self {
        self.pipeline_uuid = pipeline_uuid.into();
        self
    }

    pub fn suppression_hours(mut self, hours: u32) -> Self {
        self.suppression_hours = hours;
        self
    }

    pub fn ssh_dir(mut self, ssh_dir: impl Into<PathBuf>) -> Self {
        self.ssh_dir = ssh_dir.into();
        self
    }

    pub fn repo_name(&self) -> String {
        git::repo_name_from_url(&self.git_url)
    }
}

/// Result of a successful pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullReport {
    pub workspace: String,
    pub repo_path: PathBuf,
    pub git_pull_status: String,
    pub git_pull_output: String,
    pub key_env_var_used: String,
}

#[derive(Clone)]
pub struct GitPullExecutor {
    notifier: SlackNotifier,
    alerts: AlertManager,
    notify_on_success: bool,
}

impl GitPullExecutor {
    pub fn new(notifier: SlackNotifier, store: Arc<dyn AlertStateStore>) -> Self {
        Self {
            notifier,
            alerts: AlertManager::new(store),
            notify_on_success: true,
        }
    }

    pub fn notify_on_success(mut self, enabled: bool) -> Self {
        self.notify_on_success = enabled;
        self
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    /// Run the pull without any alerting.
    pub async fn execute_git_pull(&self, req: &PullRequest) -> Result<PullReport> {
        if !req.repo_path.exists() {
            return Err(PullError::RepoPathMissing(req.repo_path.clone()));
        }

        let workspace = req.workspace_name.as_deref();
        let key = ssh_key::resolve_ssh_key(req.ssh_key.as_deref(), workspace, |name| {
            std::env::var(name).ok()
        })?;
        let key = ssh_key::normalize_ssh_key(&key);

        let key_filename = req
            .key_filename
            .clone()
            .unwrap_or_else(|| ssh_key::default_key_filename(workspace));

        // The guard removes the key file on every exit path.
        let deploy_key = DeployKey::write(&key, &key_filename, &req.ssh_dir)?;
        let output =
            git::pull(&req.repo_path, &req.git_url, &req.branch, deploy_key.path()).await?;
        drop(deploy_key);

        Ok(PullReport {
            workspace: workspace.unwrap_or("N/A").to_string(),
            repo_path: req.repo_path.clone(),
            git_pull_status: "success".to_string(),
            git_pull_output: output.trim().to_string(),
            key_env_var_used: workspace
                .map(ssh_key::key_env_var)
                .unwrap_or_else(|| "N/A".to_string()),
        })
    }

    /// Run the pull and alert Slack.
    ///
    /// Success clears the pipeline's alert state. A failure is alerted unless the
    /// same error was already alerted inside the suppression window. Either way
    /// the pull error is returned.
    pub async fn execute_with_alerting(&self, req: &PullRequest) -> Result<PullReport> {
        let repo_name = req.repo_name();

        match self.execute_git_pull(req).await {
            Ok(report) => {
                if let Err(e) = self.alerts.clear_alert_state(&req.pipeline_uuid).await {
                    warn!("Could not clear alert state for '{}': {}", req.pipeline_uuid, e);
                }
                if self.notify_on_success {
                    if let Err(e) = self
                        .notifier
                        .send_success(
                            &repo_name,
                            req.workspace_name.as_deref(),
                            &req.branch,
                            &report.git_pull_output,
                        )
                        .await
                    {
                        warn!("Failed to send Slack alert: {}", e);
                    }
                }
                info!("Pulled '{}' ({}) successfully", repo_name, req.branch);
                Ok(report)
            }
            Err(err) => {
                error!("Pull of '{}' failed: {}", repo_name, err);
                self.alert_failure(req, &repo_name, &err).await;
                Err(err)
            }
        }
    }

    async fn alert_failure(&self, req: &PullRequest, repo_name: &str, err: &PullError) {
        let text = err.alert_text();
        let signature = truncate_chars(text.trim(), ERROR_SIGNATURE_CHARS);
        let now = Utc::now();

        let decision = match self
            .alerts
            .should_send_alert(&req.pipeline_uuid, signature, req.suppression_hours, now)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Could not load alert state, alerting anyway: {}", e);
                AlertDecision::Send {
                    previous: Default::default(),
                }
            }
        };

        match decision {
            AlertDecision::Send { .. } => {
                if let Err(e) = self
                    .notifier
                    .send_failure(
                        repo_name,
                        req.workspace_name.as_deref(),
                        truncate_chars(&text, MAX_OUTPUT_CHARS),
                    )
                    .await
                {
                    warn!("Failed to send Slack alert: {}", e);
                }
                if let Err(e) = self
                    .alerts
                    .save_alert_state(&req.pipeline_uuid, signature, now, "failed")
                    .await
                {
                    warn!("Could not save alert state for '{}': {}", req.pipeline_uuid, e);
                }
            }
            AlertDecision::Suppress { since } => {
                info!(
                    "Alert suppressed - same error occurred {}m ago (suppression window: {} hour(s))",
                    since.num_minutes(),
                    req.suppression_hours
                );
            }
        }
    }

    /// Run with alerting and record the run's progress in `store`.
    pub async fn execute_recorded(
        &self,
        store: &SqlStore,
        mut run: PullRun,
        req: &PullRequest,
    ) -> Result<PullReport> {
        if let Err(e) = store.update_run_status(&run.id, RunStatus::Running).await {
            warn!("Could not mark run {} as running: {}", run.id, e);
        }

        let result = self.execute_with_alerting(req).await;
        match &result {
            Ok(report) => run.mark_success(report.git_pull_output.clone()),
            Err(e) => run.mark_failed(e.to_string()),
        }

        if let Err(e) = store.complete_run(&run).await {
            error!("Failed to record completion of run {}: {}", run.id, e);
        }
        result
    }
}
