//! HA front-VM state, reported by the sentinel's status endpoint and
//! consumed by nothing else in-process — this is a wire DTO, not state the
//! daemon shares or persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SentinelMode {
    Proxy,
    Maintenance,
}

/// TLS certificate material as read from the backend's cert-export endpoint.
/// Same wire shape as the daemon's `ExportedCertificate`; duplicated here
/// rather than pulled in via a `devplane-core` dependency, since the
/// sentinel is an independent binary that only shares entity/DTO types with
/// the daemon, never its engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertEntry {
    pub domain: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelStatus {
    pub mode: SentinelMode,
    pub backend_internal_ip: String,
    pub forwarded_ports: Vec<u16>,
    pub preemption_count: u64,
    pub last_preemption_at: Option<DateTime<Utc>>,
    /// Seconds since `last_preemption_at` if currently in `MAINTENANCE`, else `None`.
    pub current_outage_duration_secs: Option<i64>,
    pub cert_count: usize,
    pub last_cert_sync_at: Option<DateTime<Utc>>,
}
