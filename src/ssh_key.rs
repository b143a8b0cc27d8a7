//! Deploy key handling: resolve the key material, normalize it, and keep it
//! on disk only for the duration of a single git invocation.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{PullError, Result};

const DEFAULT_KEY_FILENAME: &str = "deploy_key";

/// Name of the env var that holds the deploy key for a workspace.
pub fn key_env_var(workspace_name: &str) -> String {
    format!("{}_SSHKEY", workspace_name)
}

/// Clean up key material pasted through env vars or secret stores.
pub fn normalize_ssh_key(key_material: &str) -> String {
    if key_material.is_empty() {
        return String::new();
    }

    let trimmed = key_material.trim().trim_matches('"').trim_matches('\'');

    let mut key = if trimmed.contains("\\n") {
        trimmed.replace("\\n", "\n")
    } else {
        trimmed.to_string()
    };

    if !key.ends_with('\n') {
        key.push('\n');
    }
    key
}

/// Pick the deploy key: an explicit key wins, otherwise `{workspace}_SSHKEY`
/// is looked up through `lookup`.
pub fn resolve_ssh_key<F>(
    explicit: Option<&str>,
    workspace_name: Option<&str>,
    lookup: F,
) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = explicit.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    match workspace_name {
        Some(workspace) => {
            let env_name = key_env_var(workspace);
            lookup(&env_name)
                .filter(|k| !k.is_empty())
                .ok_or(PullError::MissingKeyEnv(env_name))
        }
        None => Err(PullError::MissingSshKey),
    }
}

/// Default file name for the key written to the ssh dir.
pub fn default_key_filename(workspace_name: Option<&str>) -> String {
    match workspace_name {
        Some(workspace) => format!("{}_deploy", workspace),
        None => DEFAULT_KEY_FILENAME.to_string(),
    }
}

/// Value for `git -c core.sshCommand=...`.
pub fn ssh_command(key_path: &Path) -> String {
    format!(
        "ssh -i '{}' -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
        key_path.display()
    )
}

/// A deploy key written to disk. The file is removed when this is dropped.
#[derive(Debug)]
pub struct DeployKey {
    path: PathBuf,
}

impl DeployKey {
    /// Write `key_material` to `ssh_dir/filename` with owner-only permissions.
    pub fn write(key_material: &str, filename: &str, ssh_dir: &Path) -> Result<Self> {
        fs::create_dir_all(ssh_dir)?;
        set_mode(ssh_dir, 0o700)?;

        let path = ssh_dir.join(filename);
        let mut file = open_private(&path)?;
        file.write_all(key_material.as_bytes())?;
        file.flush()?;
        set_mode(&path, 0o600)?;

        debug!("Wrote deploy key to {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DeployKey {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed deploy key {}", self.path.display()),
            Err(e) => warn!(
                "Could not remove deploy key {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
