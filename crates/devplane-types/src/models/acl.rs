//! Network ACL: ordered ingress/egress rule lists, first-match-wins.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleAction {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AclPreset {
    FullIsolation,
    HttpOnly,
    Permissive,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclRule {
    pub action: RuleAction,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub destination_port: Option<u16>,
    pub protocol: Option<super::Protocol>,
    pub description: String,
}

/// The full rule set installed on a DevBox's network namespace.
///
/// Order is significant within each list: first match wins, with a final
/// implicit deny terminating both lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkAcl {
    pub preset: AclPreset,
    pub ingress: Vec<AclRule>,
    pub egress: Vec<AclRule>,
}
