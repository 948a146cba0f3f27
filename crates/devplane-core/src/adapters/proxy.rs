//! C6 — Proxy Adapter.
//!
//! Upserts HTTP/TCP routes on the reverse proxy's admin API and reads back
//! its TLS certificate material. All mutating operations are
//! idempotent against the proxy's admin API — callers may retry freely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devplane_types::models::Protocol;
use devplane_types::{AppError, AppResult};

/// TLS certificate material as exported by the proxy's admin API; consumed
/// directly by the sentinel's cert-sync loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedCertificate {
    pub domain: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDescriptor {
    pub full_domain: String,
    pub target_ip: String,
    pub target_port: u16,
}

#[async_trait]
pub trait ProxyAdapter: Send + Sync {
    async fn upsert_http_route(&self, domain: &str, target_ip: &str, port: u16) -> AppResult<()>;
    async fn delete_http_route(&self, domain: &str) -> AppResult<()>;
    async fn upsert_passthrough(
        &self,
        external_port: u16,
        protocol: Protocol,
        target_ip: &str,
        target_port: u16,
    ) -> AppResult<()>;
    async fn delete_passthrough(&self, external_port: u16, protocol: Protocol) -> AppResult<()>;
    async fn list_routes(&self) -> AppResult<Vec<RouteDescriptor>>;
    async fn export_certificates(&self) -> AppResult<Vec<ExportedCertificate>>;
}

/// Talks to the reverse proxy's local admin HTTP API (as configured, e.g.
/// `http://127.0.0.1:2019` for a Caddy-shaped admin plane).
pub struct HttpProxyAdapter {
    client: reqwest::Client,
    admin_base_url: String,
}

impl HttpProxyAdapter {
    pub fn new(admin_base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), admin_base_url: admin_base_url.into() }
    }

    async fn put(&self, path: &str, body: serde_json::Value) -> AppResult<()> {
        let url = format!("{}{path}", self.admin_base_url);
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::unavailable(format!("proxy admin PUT {path}: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(AppError::unavailable(format!("proxy admin PUT {path} returned {status}: {text}")))
        }
    }

    async fn delete(&self, path: &str) -> AppResult<()> {
        let url = format!("{}{path}", self.admin_base_url);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| AppError::unavailable(format!("proxy admin DELETE {path}: {e}")))?;
        // Deletes are idempotent: a 404 on a route that's already gone is
        // success from the caller's point of view.
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(AppError::unavailable(format!("proxy admin DELETE {path} returned {status}: {text}")))
        }
    }
}

#[async_trait]
impl ProxyAdapter for HttpProxyAdapter {
    async fn upsert_http_route(&self, domain: &str, target_ip: &str, port: u16) -> AppResult<()> {
        self.put(
            &format!("/routes/http/{domain}"),
            serde_json::json!({ "domain": domain, "target": format!("{target_ip}:{port}") }),
        )
        .await
    }

    async fn delete_http_route(&self, domain: &str) -> AppResult<()> {
        self.delete(&format!("/routes/http/{domain}")).await
    }

    async fn upsert_passthrough(
        &self,
        external_port: u16,
        protocol: Protocol,
        target_ip: &str,
        target_port: u16,
    ) -> AppResult<()> {
        let proto = match protocol {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        self.put(
            &format!("/routes/passthrough/{proto}/{external_port}"),
            serde_json::json!({ "target": format!("{target_ip}:{target_port}") }),
        )
        .await
    }

    async fn delete_passthrough(&self, external_port: u16, protocol: Protocol) -> AppResult<()> {
        let proto = match protocol {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        self.delete(&format!("/routes/passthrough/{proto}/{external_port}")).await
    }

    async fn list_routes(&self) -> AppResult<Vec<RouteDescriptor>> {
        let url = format!("{}/routes/http", self.admin_base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::unavailable(format!("listing proxy routes: {e}")))?;
        response
            .json::<Vec<RouteDescriptor>>()
            .await
            .map_err(|e| AppError::unavailable(format!("parsing proxy routes response: {e}")))
    }

    async fn export_certificates(&self) -> AppResult<Vec<ExportedCertificate>> {
        let url = format!("{}/certificates", self.admin_base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::unavailable(format!("exporting certificates: {e}")))?;
        response
            .json::<Vec<ExportedCertificate>>()
            .await
            .map_err(|e| AppError::unavailable(format!("parsing certificate export response: {e}")))
    }
}
