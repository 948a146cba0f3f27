//! Reverse-proxy routes: HTTP (TLS-terminated subdomains) and L4 passthrough.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Unique key: `full_domain`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRoute {
    pub full_domain: String,
    pub target_ip: String,
    pub target_port: u16,
    /// `false` once the owning App is stopped; the route record is kept
    /// (it is only removed on App delete) but traffic is not forwarded.
    pub active: bool,
}

/// Unique key: `(external_port, protocol)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassthroughRoute {
    pub external_port: u16,
    pub protocol: Protocol,
    pub target_ip: String,
    pub target_port: u16,
}
