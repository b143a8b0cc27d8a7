//! Git command wrappers using [`tokio::process::Command`].

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, error, info, instrument};

use crate::error::{PullError, Result};
use crate::ssh_key::ssh_command;

/// Run `git pull <git_url> <branch>` inside `repo_path`, authenticating with
/// the deploy key at `key_path`.
///
/// Returns git's stdout on success. A non-zero exit becomes
/// [`PullError::GitPullFailed`] carrying stdout followed by stderr.
#[instrument(skip(key_path), fields(repo = %repo_path.display(), %git_url, %branch))]
pub async fn pull(repo_path: &Path, git_url: &str, branch: &str, key_path: &Path) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.current_dir(repo_path)
        .arg("-c")
        .arg(format!("core.sshCommand={}", ssh_command(key_path)))
        .arg("pull")
        .arg(git_url)
        .arg(branch);

    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    info!("Running (cwd = '{}'): git pull {} {}", repo_path.display(), git_url, branch);

    let output = cmd.output().await.map_err(|e| {
        error!("git pull failed to start: {}", e);
        e
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        let combined = format!("{}{}", stdout, String::from_utf8_lossy(&output.stderr));
        error!("git pull failed ({}): {}", output.status, combined.trim());
        return Err(PullError::GitPullFailed {
            status: output.status.to_string(),
            output: combined,
        });
    }

    debug!("git pull output:\n{}", stdout);
    Ok(stdout)
}

/// Short repository name from a remote URL, used to label alerts.
pub fn repo_name_from_url(git_url: &str) -> String {
    let trimmed = git_url.trim().trim_end_matches('/');
    let last = trimmed
        .rsplit(|c: char| c == '/' || c == ':')
        .next()
        .unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}
