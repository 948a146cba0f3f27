//! Daemon launch configuration: a JSON config file (mirroring this
//! codebase's `config.json`/DNS-credentials-file pattern) merged with
//! environment variable overrides, parsed by `clap` for the launch-time
//! subset (bind addresses, config path, log level).

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use devplane_core::config::DnsProviderConfig;
use devplane_types::{AppError, AppResult};

#[derive(Parser, Debug)]
#[command(name = "devplaned", about = "DevPlane control-plane daemon", version)]
pub struct Cli {
    /// Path to the JSON daemon config file.
    #[arg(long, env = "DEVPLANE_CONFIG", default_value = "/etc/devplane/config.json")]
    pub config: PathBuf,

    /// Override the REST/JSON gateway bind address.
    #[arg(long, env = "DEVPLANE_BIND_ADDR")]
    pub bind_addr: Option<String>,

    /// Override the binary RPC listener bind address.
    #[arg(long, env = "DEVPLANE_RPC_BIND_ADDR")]
    pub rpc_bind_addr: Option<String>,

    /// Tracing env-filter directive, e.g. "info" or "devplane_core=debug".
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Run the daemon (default if no subcommand is given).
    Serve,
    /// One-shot: generate a fresh token-signing secret at the configured path.
    InitSecret,
    /// One-shot: run pending (additive-only) schema migrations and exit.
    Migrate,
}

/// `{ bind_addr, rpc_bind_addr, database_url, base_domain,
/// token_signing_secret_path, max_token_expiry_hours, dns, proxy_admin_url }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub bind_addr: String,
    pub rpc_bind_addr: String,
    pub database_url: String,
    pub base_domain: String,
    pub token_signing_secret_path: PathBuf,
    pub max_token_expiry_hours: Option<i64>,
    pub dns: Option<DnsProviderConfig>,
    pub proxy_admin_url: String,
    /// The reverse proxy's own source IP, used to scope FULL_ISOLATION's
    /// ingress allow rule.
    pub proxy_source_ip: String,
    pub hypervisor_binary: Option<String>,
    /// CIDR of the private network DevBoxes and apps are attached to,
    /// reported back verbatim by `GetSystemInfo`.
    pub network_cidr: Option<String>,
}

impl DaemonConfig {
    /// Loads and parses the config file. The file must be `0600` — the
    /// same permission discipline this codebase applies to its
    /// credentials/secret files.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path)
            .map_err(|e| AppError::internal(format!("reading config metadata {path:?}: {e}")))?;
        let mode = metadata.permissions().mode() & 0o777;
        if mode != 0o600 {
            tracing::warn!(path = %path.display(), mode = format!("{mode:o}"), "config file is not 0600");
        }
        let content = fs::read_to_string(path)
            .map_err(|e| AppError::internal(format!("reading config {path:?}: {e}")))?;
        serde_json::from_str(&content).map_err(|e| AppError::internal(format!("parsing config {path:?}: {e}")))
    }

    /// `MAX_TOKEN_EXPIRY_HOURS` env var takes precedence over the config
    /// file value; absent both, falls back to 30 days.
    pub fn max_token_expiry(&self) -> chrono::Duration {
        if std::env::var("MAX_TOKEN_EXPIRY_HOURS").is_ok() {
            return devplane_core::config::max_token_expiry_from_env();
        }
        self.max_token_expiry_hours
            .map(chrono::Duration::hours)
            .unwrap_or_else(|| chrono::Duration::days(30))
    }
}
