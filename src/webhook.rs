//! GitHub push payload extraction

use serde_json::Value;

/// Fields of a push event that select and describe a pull
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub repo_name: String,
    pub branch: String,
    pub commit_sha: Option<String>,
}

impl PushEvent {
    /// Returns None when `ref` or `repository.name` is missing.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let branch_ref = payload.get("ref").and_then(|r| r.as_str())?;
        let repo_name = payload
            .get("repository")
            .and_then(|r| r.get("name"))
            .and_then(|n| n.as_str())?;

        Some(Self {
            repo_name: repo_name.to_string(),
            branch: branch_ref
                .strip_prefix("refs/heads/")
                .unwrap_or(branch_ref)
                .to_string(),
            commit_sha: payload
                .get("after")
                .and_then(|v| v.as_str())
                .map(String::from),
        })
    }
}
