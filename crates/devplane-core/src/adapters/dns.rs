//! C5 — DNS Provider Adapter.
//!
//! Pluggable client for creating apex + wildcard A records at a registrar
//!. `HttpDnsProviderAdapter` is a generic REST client
//! parameterized by the provider's base URL and auth header, matching the
//! shape most registrar APIs (DigitalOcean, Cloudflare, etc.) share closely
//! enough that one implementation covers them via config, not code.

use async_trait::async_trait;
use serde::Deserialize;

use devplane_types::{AppError, AppResult};

use crate::config::DnsCredentials;

const RECORD_TTL_SECONDS: u32 = 600;

#[async_trait]
pub trait DnsProviderAdapter: Send + Sync {
    async fn verify_credentials(&self) -> AppResult<()>;
    async fn verify_domain(&self, domain: &str) -> AppResult<()>;

    /// Idempotently creates the apex `@` record (and, if `include_wildcard`,
    /// the `*` wildcard record) pointing at `server_ip` with a 10-minute
    /// TTL. Existing records with matching data are left alone; records
    /// with different data are replaced.
    async fn setup_hosting_records(
        &self,
        domain: &str,
        server_ip: &str,
        include_wildcard: bool,
    ) -> AppResult<()>;
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ListRecordsResponse {
    domain_records: Vec<DnsRecord>,
}

/// Talks to a DigitalOcean-shaped `domains/{domain}/records` API; the
/// registrar-specific base URL and bearer token come from
/// `DnsCredentials`/config, keeping the client itself provider-agnostic.
pub struct HttpDnsProviderAdapter {
    client: reqwest::Client,
    base_url: String,
    credentials: DnsCredentials,
}

impl HttpDnsProviderAdapter {
    pub fn new(base_url: impl Into<String>, credentials: DnsCredentials) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), credentials }
    }

    fn bearer(&self) -> AppResult<&str> {
        self.credentials
            .api_token
            .as_deref()
            .or(self.credentials.api_key.as_deref())
            .ok_or_else(|| AppError::unauthenticated("no DNS provider credential configured"))
    }

    fn classify(&self, status: reqwest::StatusCode, body: &str) -> AppError {
        match status.as_u16() {
            401 | 403 => AppError::unauthenticated(format!("DNS provider rejected credentials: {body}")),
            404 => AppError::not_found(format!("domain not found in DNS account: {body}")),
            _ => AppError::unavailable(format!("DNS provider error {status}: {body}")),
        }
    }

    async fn list_records(&self, domain: &str) -> AppResult<Vec<DnsRecord>> {
        let url = format!("{}/domains/{domain}/records", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.bearer()?)
            .send()
            .await
            .map_err(|e| AppError::unavailable(format!("listing DNS records: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify(status, &body));
        }
        Ok(response.json::<ListRecordsResponse>().await.map(|r| r.domain_records).unwrap_or_default())
    }

    async fn upsert_a_record(&self, domain: &str, name: &str, ip: &str) -> AppResult<()> {
        let existing = self
            .list_records(domain)
            .await?
            .into_iter()
            .find(|r| r.record_type == "A" && r.name == name);

        match existing {
            Some(record) if record.data == ip => Ok(()),
            Some(record) => {
                let url = format!("{}/domains/{domain}/records/{}", self.base_url, record.id);
                let body = serde_json::json!({ "data": ip, "ttl": RECORD_TTL_SECONDS });
                let response = self
                    .client
                    .put(&url)
                    .bearer_auth(self.bearer()?)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| AppError::unavailable(format!("updating DNS record: {e}")))?;
                if !response.status().is_success() {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    return Err(self.classify(status, &text));
                }
                Ok(())
            }
            None => {
                let url = format!("{}/domains/{domain}/records", self.base_url);
                let body = serde_json::json!({
                    "type": "A",
                    "name": name,
                    "data": ip,
                    "ttl": RECORD_TTL_SECONDS,
                });
                let response = self
                    .client
                    .post(&url)
                    .bearer_auth(self.bearer()?)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| AppError::unavailable(format!("creating DNS record: {e}")))?;
                if !response.status().is_success() {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    return Err(self.classify(status, &text));
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DnsProviderAdapter for HttpDnsProviderAdapter {
    async fn verify_credentials(&self) -> AppResult<()> {
        let url = format!("{}/account", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.bearer()?)
            .send()
            .await
            .map_err(|e| AppError::unavailable(format!("verifying DNS credentials: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(self.classify(status, &body))
        }
    }

    async fn verify_domain(&self, domain: &str) -> AppResult<()> {
        let url = format!("{}/domains/{domain}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.bearer()?)
            .send()
            .await
            .map_err(|e| AppError::unavailable(format!("verifying domain: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(self.classify(status, &body))
        }
    }

    async fn setup_hosting_records(
        &self,
        domain: &str,
        server_ip: &str,
        include_wildcard: bool,
    ) -> AppResult<()> {
        self.upsert_a_record(domain, "@", server_ip).await?;
        if include_wildcard {
            self.upsert_a_record(domain, "*", server_ip).await?;
        }
        Ok(())
    }
}
