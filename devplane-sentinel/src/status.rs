//! Status server: the plain-HTTP, always-reachable status endpoint on its
//! own dedicated port — unlike the maintenance listener, this one is never
//! behind the DNAT redirect, so it answers in both PROXY and MAINTENANCE.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use devplane_types::models::SentinelStatus;

use crate::state::SentinelState;

pub fn router(state: Arc<SentinelState>) -> Router {
    Router::new().route("/status", get(status)).with_state(state)
}

async fn status(State(state): State<Arc<SentinelState>>) -> Json<SentinelStatus> {
    Json(SentinelStatus {
        mode: state.mode().await,
        backend_internal_ip: state.config.backend_internal_ip.clone(),
        forwarded_ports: state.config.forwarded_ports.clone(),
        preemption_count: state.preemption_count(),
        last_preemption_at: state.last_preemption_at().await,
        current_outage_duration_secs: state.current_outage_duration().await.map(|d| d.num_seconds()),
        cert_count: state.cert_store.cert_count(),
        last_cert_sync_at: state.cert_store.last_fetched_at(),
    })
}
