//! Ambient daemon configuration: the DNS-provider credentials file and the
//! token-signing secret file, both loaded once at startup and
//! treated as immutable process-wide state.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use devplane_types::{AppError, AppResult};

/// `{provider, domain, email, credentials}` loaded from a 0600 JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsProviderConfig {
    pub provider: String,
    pub domain: String,
    pub email: String,
    pub credentials: DnsCredentials,
}

/// The three authentication shapes DNS providers in this deployment
/// ecosystem present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsCredentials {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_token: Option<String>,
}

impl DnsProviderConfig {
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| AppError::internal(format!("reading DNS config {path:?}: {e}")))?;
        serde_json::from_str(&content)
            .map_err(|e| AppError::internal(format!("parsing DNS config {path:?}: {e}")))
    }
}

/// Loads the shared token-signing secret from a 0600 file, trimming
/// trailing whitespace before use.
pub fn load_signing_secret(path: impl AsRef<Path>) -> AppResult<Vec<u8>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::internal(format!("reading signing secret {path:?}: {e}")))?;
    let trimmed = content.trim_end();
    if trimmed.is_empty() {
        return Err(AppError::internal(format!("signing secret at {path:?} is empty")));
    }
    Ok(trimmed.as_bytes().to_vec())
}

/// Writes a freshly generated secret to `path` with 0600 permissions. Used
/// by the daemon's one-shot `init` subcommand, not on every startup.
pub fn generate_signing_secret(path: impl AsRef<Path>) -> AppResult<()> {
    use rand::RngCore;
    let path = path.as_ref();
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let encoded = hex_encode(&bytes);
    fs::write(path, &encoded)
        .map_err(|e| AppError::internal(format!("writing signing secret {path:?}: {e}")))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| AppError::internal(format!("chmod signing secret {path:?}: {e}")))?;
    Ok(())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Resolves `MAX_TOKEN_EXPIRY_HOURS`; absent or unparsable falls
/// back to 30 days.
pub fn max_token_expiry_from_env() -> chrono::Duration {
    std::env::var("MAX_TOKEN_EXPIRY_HOURS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .map(chrono::Duration::hours)
        .unwrap_or_else(|| chrono::Duration::days(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        fs::write(&path, "supersecret\n\n").unwrap();
        let secret = load_signing_secret(&path).unwrap();
        assert_eq!(secret, b"supersecret");
    }

    #[test]
    fn env_override_parses() {
        std::env::set_var("MAX_TOKEN_EXPIRY_HOURS", "12");
        assert_eq!(max_token_expiry_from_env(), chrono::Duration::hours(12));
        std::env::remove_var("MAX_TOKEN_EXPIRY_HOURS");
    }
}
