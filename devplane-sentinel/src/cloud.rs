//! Cloud provider adapter: polls the backend VM's operation history for a
//! preempt transition and issues the restart call. Modeled the same way
//! `devplane-core`'s DNS/proxy adapters wrap a provider's HTTP API behind a
//! narrow trait — this crate can't depend on `devplane-core` (it only
//! shares `devplane-types`), so the trait is re-declared locally rather
//! than reused.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct OperationHistory {
    operations: Vec<Operation>,
}

#[async_trait::async_trait]
pub trait CloudProviderAdapter: Send + Sync {
    /// Returns `true` if the most recent operation on record is a preempt
    /// transition not yet observed by a prior poll.
    async fn poll_preempted(&mut self) -> anyhow::Result<bool>;
    async fn start_instance(&self) -> anyhow::Result<()>;
}

/// Talks to a generic cloud provider admin API: `GET {base}/instances/{id}/operations`
/// returning `{ operations: [{ type }, ...] }` newest-first, and
/// `POST {base}/instances/{id}/start`.
pub struct HttpCloudProviderAdapter {
    client: reqwest::Client,
    base_url: String,
    instance_id: String,
    last_seen_preempt_op: Option<String>,
}

impl HttpCloudProviderAdapter {
    pub fn new(base_url: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            instance_id: instance_id.into(),
            last_seen_preempt_op: None,
        }
    }
}

#[async_trait::async_trait]
impl CloudProviderAdapter for HttpCloudProviderAdapter {
    async fn poll_preempted(&mut self) -> anyhow::Result<bool> {
        let url = format!("{}/instances/{}/operations", self.base_url, self.instance_id);
        let history: OperationHistory = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("polling operation history: {e}"))?
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("parsing operation history: {e}"))?;
        let Some(newest) = history.operations.first() else {
            return Ok(false);
        };
        if newest.kind != "preempt" {
            return Ok(false);
        }
        let marker = format!("{}:{}", self.instance_id, newest.kind);
        if self.last_seen_preempt_op.as_deref() == Some(marker.as_str()) {
            return Ok(false);
        }
        self.last_seen_preempt_op = Some(marker);
        Ok(true)
    }

    async fn start_instance(&self) -> anyhow::Result<()> {
        let url = format!("{}/instances/{}/start", self.base_url, self.instance_id);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("issuing StartInstance: {e}"))?;
        if !response.status().is_success() {
            anyhow::bail!("StartInstance returned {}", response.status());
        }
        Ok(())
    }
}
