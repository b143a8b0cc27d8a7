use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum size for run output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Represents the status of a pull run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Cli,
    Webhook,
    Manual,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Cli => "cli",
            RunTrigger::Webhook => "webhook",
            RunTrigger::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "webhook" => RunTrigger::Webhook,
            "manual" => RunTrigger::Manual,
            _ => RunTrigger::Cli,
        }
    }
}

/// One execution of a pull, as recorded in the run history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRun {
    pub id: String,
    pub repo_name: String,
    pub branch: String,
    pub trigger: RunTrigger,
    pub commit_sha: Option<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub output: Option<String>,
    pub output_truncated: bool,
    pub error: Option<String>,
}

impl PullRun {
    /// Create a new run in Queued status
    pub fn new(repo_name: String, branch: String, trigger: RunTrigger) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            repo_name,
            branch,
            trigger,
            commit_sha: None,
            status: RunStatus::Queued,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            output: None,
            output_truncated: false,
            error: None,
        }
    }

    pub fn with_commit(mut self, commit_sha: Option<String>) -> Self {
        self.commit_sha = commit_sha;
        self
    }

    /// Mark run as successful with output (truncates if too large)
    pub fn mark_success(&mut self, mut output: String) {
        self.status = RunStatus::Success;
        self.finish();

        if output.len() > MAX_OUTPUT_SIZE {
            let mut cut = MAX_OUTPUT_SIZE;
            while !output.is_char_boundary(cut) {
                cut -= 1;
            }
            output.truncate(cut);
            output.push_str("\n... (output truncated)");
            self.output_truncated = true;
        }

        self.output = Some(output);
    }

    /// Mark run as failed with error
    pub fn mark_failed(&mut self, error: String) {
        self.status = RunStatus::Failed;
        self.finish();
        self.error = Some(error);
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
        self.completed_at = Some(now);
    }
}
