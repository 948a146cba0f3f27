//! Collaborator: shared access to another user's DevBox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique key: `(container_name, collaborator_username)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collaborator {
    pub container_name: String,
    pub collaborator_username: String,
    pub owner_username: String,
    /// `{owner}-container-{collab}`, created inside the DevBox.
    pub account_name: String,
    pub ssh_public_key: String,
    pub has_sudo: bool,
    pub has_container_runtime: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl Collaborator {
    pub fn account_name_for(owner_username: &str, collaborator_username: &str) -> String {
        format!("{owner_username}-container-{collaborator_username}")
    }
}
