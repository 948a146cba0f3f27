//! Request-scoped identity and correlation ids. Never persisted.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The authenticated caller of a request, attached by the Token Authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub roles: HashSet<String>,
}

impl Identity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role("admin")
    }

    /// Authorization for ownership-scoped operations: admins act on anyone's
    /// resources, everyone else only on their own.
    pub fn can_act_as(&self, username: &str) -> bool {
        self.is_admin() || self.username == username
    }
}

/// Correlation id attached to `INTERNAL` errors so operators can grep logs
/// for the request that produced a given client-visible failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestId(pub uuid::Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
