//! Sentinel launch configuration: a JSON config file merged with
//! environment overrides, parsed by `clap` for the launch-time subset —
//! the same split `devplane-server`'s `config.rs` uses.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(name = "devplane-sentinel", about = "DevPlane HA front-VM", version)]
pub struct Cli {
    /// Path to the JSON sentinel config file.
    #[arg(long, env = "SENTINEL_CONFIG", default_value = "/etc/devplane/sentinel.json")]
    pub config: PathBuf,

    /// Tracing env-filter directive, e.g. "info" or "devplane_sentinel=debug".
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Directory for the rotating file log. When unset, logs go to stdout
    /// only — useful for interactive runs and tests.
    #[arg(long, env = "SENTINEL_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

/// `{ backend_internal_ip, health_port, forwarded_ports, management_ssh_port,
/// maintenance_bind_addr, status_bind_addr, cert_export_url,
/// provider_api_base_url, provider_instance_id, self_signed_domain,
/// preempt_poll_interval_secs, health_probe_interval_secs,
/// cert_sync_interval_secs, recovery_timeout_secs }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Backend VM's internal address, the DNAT target in PROXY mode and
    /// the health-probe target throughout.
    pub backend_internal_ip: String,
    /// TCP port on `backend_internal_ip` the health checker probes.
    pub health_port: u16,
    /// Public ports DNAT'd to the backend in PROXY mode. Always includes
    /// 80/443/the backend RPC port plus SSH (22); management SSH to the
    /// sentinel itself uses a distinct, never-forwarded port (2222).
    pub forwarded_ports: Vec<u16>,
    #[serde(default = "default_management_ssh_port")]
    pub management_ssh_port: u16,
    /// Bind address for the TLS-terminating maintenance listener.
    pub maintenance_bind_addr: String,
    /// Bind address for the plain-HTTP status endpoint.
    pub status_bind_addr: String,
    /// The backend daemon's cert-export endpoint, e.g.
    /// `https://backend.internal:8443/certs`.
    pub cert_export_url: String,
    /// Cloud provider API base URL for operation-history polling and
    /// instance restart.
    pub provider_api_base_url: String,
    pub provider_instance_id: String,
    /// Domain name baked into the self-signed fallback cert generated at
    /// startup.
    #[serde(default = "default_self_signed_domain")]
    pub self_signed_domain: String,
    #[serde(default = "default_preempt_poll_interval_secs")]
    pub preempt_poll_interval_secs: u64,
    #[serde(default = "default_health_probe_interval_secs")]
    pub health_probe_interval_secs: u64,
    #[serde(default = "default_cert_sync_interval_secs")]
    pub cert_sync_interval_secs: u64,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: i64,
}

fn default_management_ssh_port() -> u16 {
    2222
}

fn default_self_signed_domain() -> String {
    "maintenance.invalid".to_string()
}

fn default_preempt_poll_interval_secs() -> u64 {
    10
}

fn default_health_probe_interval_secs() -> u64 {
    15
}

fn default_cert_sync_interval_secs() -> u64 {
    6 * 3600
}

fn default_recovery_timeout_secs() -> i64 {
    600
}

impl SentinelConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading sentinel config {path:?}: {e}"))?;
        serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("parsing sentinel config {path:?}: {e}"))
    }
}
