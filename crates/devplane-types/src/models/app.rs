//! App: a user-defined web service deployed into a DevBox and exposed at a TLS subdomain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    Uploading,
    Building,
    Running,
    Stopped,
    Restarting,
    Failed,
}

/// Unique key: `(username, name)`. Also carries a globally unique `id` and
/// a globally unique `subdomain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub id: uuid::Uuid,
    pub username: String,
    pub name: String,
    pub state: AppState,
    pub subdomain: String,
    pub base_domain: String,
    pub port: u16,
    pub container_name: String,
    pub container_ip: Option<String>,
    /// Tag produced by the build stage, e.g. `{username}/{name}:latest`.
    pub image: Option<String>,
    pub env_vars: HashMap<String, String>,
    /// Advisory only; the per-container ACL is the canonical authority.
    pub acl_preset: Option<String>,
    pub error_message: Option<String>,
    pub restart_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deployed_at: Option<DateTime<Utc>>,
}

impl App {
    pub fn full_domain(&self) -> String {
        format!("{}.{}", self.subdomain, self.base_domain)
    }
}

/// `^[a-z0-9][a-z0-9-]{0,62}$`
pub fn is_valid_subdomain(subdomain: &str) -> bool {
    let mut chars = subdomain.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return false;
    }
    if subdomain.len() > 63 {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdomain_validation() {
        assert!(is_valid_subdomain("bob-web"));
        assert!(is_valid_subdomain("9bob"));
        assert!(!is_valid_subdomain("-bob"));
        assert!(!is_valid_subdomain(""));
        assert!(!is_valid_subdomain(&"a".repeat(64)));
    }

    #[test]
    fn full_domain_format() {
        let app = App {
            id: uuid::Uuid::nil(),
            username: "bob".into(),
            name: "web".into(),
            state: AppState::Running,
            subdomain: "bob-web".into(),
            base_domain: "apps.example.com".into(),
            port: 8080,
            container_name: "bob-container".into(),
            container_ip: Some("10.0.0.2".into()),
            image: Some("bob/web:latest".into()),
            env_vars: HashMap::new(),
            acl_preset: None,
            error_message: None,
            restart_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deployed_at: None,
        };
        assert_eq!(app.full_domain(), "bob-web.apps.example.com");
    }
}
