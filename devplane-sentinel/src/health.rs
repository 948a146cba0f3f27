//! Health checker: the cooperative task that decides recovery. Runs
//! continuously at a fixed interval; while the sentinel is in MAINTENANCE
//! it TCP-probes the backend, and after two consecutive successes restores
//! forwarding and flips back to PROXY.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;

use devplane_types::models::SentinelMode;

use crate::dnat::DnatController;
use crate::state::SentinelState;

pub async fn run(state: Arc<SentinelState>, dnat: Arc<Mutex<DnatController>>) {
    let mut consecutive_successes = 0u32;
    let mut interval = tokio::time::interval(Duration::from_secs(state.config.health_probe_interval_secs));
    loop {
        interval.tick().await;
        if state.mode().await != SentinelMode::Maintenance {
            consecutive_successes = 0;
            continue;
        }
        warn_if_recovery_overdue(&state).await;

        match probe(&state.config.backend_internal_ip, state.config.health_port).await {
            Ok(()) => {
                consecutive_successes += 1;
                tracing::debug!(consecutive_successes, "backend health probe succeeded");
            }
            Err(err) => {
                if consecutive_successes > 0 {
                    tracing::debug!(error = %err, "backend health probe failed, resetting streak");
                }
                consecutive_successes = 0;
            }
        }

        if consecutive_successes >= 2 {
            consecutive_successes = 0;
            if let Err(err) = dnat
                .lock()
                .await
                .configure(&state.config.backend_internal_ip, &state.config.forwarded_ports)
                .await
            {
                tracing::error!(error = %err, "failed to restore DNAT forwarding on recovery");
                continue;
            }
            let recovery = state.enter_proxy().await;
            match recovery {
                Some(duration) => tracing::info!(recovery_secs = duration.num_seconds(), "backend recovered, switching to PROXY"),
                None => tracing::info!("backend recovered, switching to PROXY"),
            }
        }
    }
}

async fn warn_if_recovery_overdue(state: &SentinelState) {
    if let Some(duration) = state.current_outage_duration().await {
        if duration.num_seconds() > state.config.recovery_timeout_secs {
            tracing::warn!(
                outage_secs = duration.num_seconds(),
                timeout_secs = state.config.recovery_timeout_secs,
                "backend recovery exceeds recoveryTimeout, continuing to probe"
            );
        }
    }
}

async fn probe(ip: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{ip}:{port}");
    tokio::time::timeout(Duration::from_secs(5), TcpStream::connect(&addr))
        .await
        .map_err(|_| anyhow::anyhow!("probe to {addr} timed out"))?
        .map_err(|e| anyhow::anyhow!("probe to {addr} failed: {e}"))?;
    Ok(())
}
