//! DevBox: a user-scoped, resource-limited container.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of a DevBox. See the state machine in the lifecycle
/// engine (`devplane-core::lifecycle`) for the legal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DevboxState {
    Creating,
    Running,
    Stopped,
    Frozen,
    Error,
    Unknown,
}

impl DevboxState {
    /// Whether a DevBox in this state is expected to carry a live `ip_address`.
    pub fn expects_ip(self) -> bool {
        matches!(self, DevboxState::Running | DevboxState::Frozen)
    }
}

/// CPU/memory/disk/GPU quota for a DevBox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevboxResources {
    /// CPU cores, e.g. "2".
    pub cpu: String,
    /// Memory, e.g. "4GB".
    pub memory: String,
    /// Disk, e.g. "20GB".
    pub disk: String,
    /// Optional GPU descriptor, e.g. "1x T4".
    pub gpu: Option<String>,
}

/// A user's development container.
///
/// Unique key: `username`. Its container name inside the hypervisor is
/// always `{username}-container`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Devbox {
    pub username: String,
    pub state: DevboxState,
    /// Non-empty iff `state.expects_ip()` and the first start has completed.
    pub ip_address: Option<String>,
    pub resources: DevboxResources,
    pub image: String,
    pub ssh_keys: Vec<String>,
    pub labels: HashMap<String, String>,
    pub docker_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when `state == Error`; the diagnostic recorded by the lifecycle engine.
    pub error_message: Option<String>,
}

impl Devbox {
    pub fn container_name(&self) -> String {
        format!("{}-container", self.username)
    }
}

/// `^[a-z][a-z0-9-]{0,30}$`
pub fn is_valid_username(username: &str) -> bool {
    let mut chars = username.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }
    if username.len() > 31 {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_validation() {
        assert!(is_valid_username("bob"));
        assert!(is_valid_username("bob-2"));
        assert!(!is_valid_username("Bob"));
        assert!(!is_valid_username("2bob"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username(&"a".repeat(32)));
    }

    #[test]
    fn state_expects_ip() {
        assert!(DevboxState::Running.expects_ip());
        assert!(DevboxState::Frozen.expects_ip());
        assert!(!DevboxState::Creating.expects_ip());
        assert!(!DevboxState::Error.expects_ip());
    }
}
