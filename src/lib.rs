pub mod alert;
pub mod api;
pub mod db;
pub mod error;
pub mod executor;
pub mod git;
pub mod logging;
pub mod rate_limit;
pub mod run;
pub mod slack;
pub mod ssh_key;
pub mod state;
pub mod utils;
pub mod webhook;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::db::SqlStore;
use crate::error::PullError;
use crate::executor::{GitPullExecutor, PullRequest};
use crate::rate_limit::RateLimiter;

pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_PIPELINE_UUID: &str = "auto_git_pull";
pub const DEFAULT_SSH_DIR: &str = "/home/src/.ssh";
pub const DEFAULT_SUPPRESSION_HOURS: u32 = 1;
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
pub const DEFAULT_DB_PATH: &str = "gitpuller.db";
const DEFAULT_RATE_LIMIT: usize = 10;
const DEFAULT_RATE_LIMIT_WINDOW: u64 = 60;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PullerConfig {
    pub slack: SlackConfig,
    pub alerting: AlertingConfig,
    pub state: StateConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub repo: Vec<RepoConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SlackConfig {
    pub webhook_url: Option<String>,
    pub notify_on_success: bool,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            notify_on_success: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertingConfig {
    pub suppression_hours: u32,
    pub ssh_dir: PathBuf,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            suppression_hours: DEFAULT_SUPPRESSION_HOURS,
            ssh_dir: PathBuf::from(DEFAULT_SSH_DIR),
        }
    }
}

/// Where alert suppression state lives. `persistent = true` keeps it in SQLite
/// so that separate scheduled invocations share it.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StateConfig {
    pub persistent: bool,
    pub db_path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            persistent: false,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepoConfig {
    pub name: String,
    pub repo_path: PathBuf,
    pub git_url: String,
    pub branch: Option<String>,
    pub workspace_name: Option<String>,
    pub key_filename: Option<String>,
    pub pipeline_uuid: Option<String>,
    pub webhook_secret: Option<String>,
    pub rate_limit: Option<usize>,
    pub rate_limit_window: Option<u64>,
}

impl RepoConfig {
    pub fn branch(&self) -> &str {
        self.branch.as_deref().unwrap_or(DEFAULT_BRANCH)
    }

    /// Alert state key. Each configured repo gets its own unless one is set.
    pub fn pipeline_uuid(&self) -> String {
        self.pipeline_uuid
            .clone()
            .unwrap_or_else(|| format!("{}_{}", DEFAULT_PIPELINE_UUID, self.name))
    }

    /// Returns true if a valid (non-empty) webhook_secret is set.
    pub fn has_webhook_secret(&self) -> bool {
        self.webhook_secret
            .as_ref()
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    pub fn get_rate_limit(&self) -> usize {
        self.rate_limit.unwrap_or(DEFAULT_RATE_LIMIT)
    }

    pub fn get_rate_limit_window(&self) -> u64 {
        self.rate_limit_window.unwrap_or(DEFAULT_RATE_LIMIT_WINDOW)
    }

    /// Build the pull request for this repo using the global alerting settings.
    pub fn to_request(&self, alerting: &AlertingConfig) -> PullRequest {
        PullRequest {
            repo_path: self.repo_path.clone(),
            git_url: self.git_url.clone(),
            branch: self.branch().to_string(),
            ssh_key: None,
            workspace_name: self.workspace_name.clone(),
            pipeline_uuid: self.pipeline_uuid(),
            suppression_hours: alerting.suppression_hours,
            key_filename: self.key_filename.clone(),
            ssh_dir: alerting.ssh_dir.clone(),
        }
    }
}

impl PullerConfig {
    pub fn find_repo(&self, name: &str) -> Option<&RepoConfig> {
        self.repo.iter().find(|r| r.name == name)
    }
}

/// Load and parse the configuration file
pub fn load_config(path: &Path) -> Result<PullerConfig, PullError> {
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        PullError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&config_str).map_err(|e| {
        PullError::ConfigError(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

pub fn parse_config(config_str: &str) -> Result<PullerConfig, PullError> {
    let config: PullerConfig = toml::from_str(config_str)?;
    for repo in &config.repo {
        if repo.name.is_empty() || repo.git_url.is_empty() {
            return Err(PullError::ConfigError(
                "every [[repo]] needs a non-empty name and git_url".to_string(),
            ));
        }
    }
    Ok(config)
}

pub struct AppState {
    pub execution_lock: Mutex<()>,
    pub rate_limiter: Mutex<RateLimiter>,
    pub executor: GitPullExecutor,
    pub store: SqlStore,
    pub config: PullerConfig,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

pub type SharedState = Arc<AppState>;
