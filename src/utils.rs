use crate::{PullerConfig, RepoConfig};
use tracing::error;

// For signature verification
use hex::decode as hex_decode;
use hmac::{Hmac, Mac};
use sha2::Sha256;
type HmacSha256 = Hmac<Sha256>;

/// Helper function for verifying GitHub webhook signature
pub fn verify_github_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    // Expected format: "sha256=..."
    let Some(git_signature) = signature_header.strip_prefix("sha256=") else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    match hex_decode(git_signature) {
        // verify_slice compares in constant time
        Ok(git_signature_bytes) => mac.verify_slice(&git_signature_bytes).is_ok(),
        Err(_) => {
            error!("Signature verification failed: header is not hex");
            false
        }
    }
}

/// Finds the configured repo matching both repository name and branch.
pub fn find_matching_repo<'a>(
    config: &'a PullerConfig,
    repo_name: &str,
    branch: &str,
) -> Option<&'a RepoConfig> {
    config
        .repo
        .iter()
        .find(|repo| repo.name == repo_name && repo.branch() == branch)
}
