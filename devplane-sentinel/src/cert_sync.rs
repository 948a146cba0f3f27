//! Cert-sync ticker: fetches TLS certificate material from the backend's
//! cert-export endpoint on a fixed interval, plus immediately whenever the
//! preempt-detect task signals a PROXY-to-MAINTENANCE transition.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use devplane_types::models::CertEntry;

use crate::cert_store::CertStore;
use crate::state::SentinelState;

pub async fn run(state: Arc<SentinelState>, notify: Arc<Notify>) {
    let client = reqwest::Client::new();
    let mut interval = tokio::time::interval(Duration::from_secs(state.config.cert_sync_interval_secs));
    // The first tick fires immediately; that's the startup sync.
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = notify.notified() => {
                tracing::info!("cert sync triggered by mode transition");
            }
        }
        if let Err(err) = sync_once(&client, &state.config.cert_export_url, &state.cert_store).await {
            tracing::warn!(error = %err, "cert sync failed, keeping previous snapshot");
        }
    }
}

async fn sync_once(client: &reqwest::Client, url: &str, store: &CertStore) -> anyhow::Result<()> {
    let certs: Vec<CertEntry> = client
        .get(url)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("fetching certs from {url}: {e}"))?
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("parsing cert export response from {url}: {e}"))?;
    let count = certs.len();
    store.swap(&certs)?;
    tracing::info!(cert_count = count, "synced TLS certificates from backend");
    Ok(())
}
