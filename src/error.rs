use std::io;
use std::path::PathBuf;

/// Custom error type for gitpuller operations
#[derive(Debug, thiserror::Error)]
pub enum PullError {
    #[error("Repo path does not exist: {}", .0.display())]
    RepoPathMissing(PathBuf),

    #[error("Missing env var {0} with the PRIVATE deploy key")]
    MissingKeyEnv(String),

    #[error("SSH key is required. Provide it directly or set a workspace name.")]
    MissingSshKey,

    #[error("git pull failed ({status}):\n{output}")]
    GitPullFailed { status: String, output: String },

    #[error(
        "Slack webhook URL is required. Provide it in the config or set the CDM_SLACK_WEBHOOK_URL environment variable."
    )]
    MissingWebhookUrl,

    #[error("Slack alert failed: {0}")]
    Notify(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl PullError {
    /// Text reported to Slack and used as the suppression signature.
    /// For git failures this is git's own output rather than the wrapper message.
    pub fn alert_text(&self) -> String {
        match self {
            PullError::GitPullFailed { output, .. } if !output.trim().is_empty() => output.clone(),
            other => other.to_string(),
        }
    }
}

/// Helper type for Results that use PullError
pub type Result<T> = std::result::Result<T, PullError>;
