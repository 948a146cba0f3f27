//! Preempt-detect loop: the event watcher. Polls the cloud provider's
//! operation history for the backend VM and reacts to a preempt
//! transition by switching to MAINTENANCE immediately, then issuing the
//! restart call — recovery itself is the health checker's job.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::cloud::CloudProviderAdapter;
use crate::dnat::DnatController;
use crate::state::SentinelState;

pub async fn run(
    state: Arc<SentinelState>,
    mut provider: Box<dyn CloudProviderAdapter>,
    dnat: Arc<Mutex<DnatController>>,
    cert_sync_notify: Arc<Notify>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(state.config.preempt_poll_interval_secs));
    loop {
        interval.tick().await;
        match provider.poll_preempted().await {
            Ok(true) => {
                tracing::warn!("backend preemption detected, entering MAINTENANCE");
                state.record_preemption_and_enter_maintenance().await;
                if let Err(err) = dnat.lock().await.clear().await {
                    tracing::error!(error = %err, "failed to clear DNAT forwarding on preempt");
                }
                cert_sync_notify.notify_one();
                if let Err(err) = provider.start_instance().await {
                    tracing::error!(error = %err, "StartInstance call failed");
                }
            }
            Ok(false) => {}
            Err(err) => tracing::warn!(error = %err, "polling operation history failed"),
        }
    }
}
