//! Liveness/readiness, the unauthenticated `Ping` RPC's REST mirror, a
//! system-info summary, and the internal certificate-export endpoint the
//! sentinel's cert-sync loop polls.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn healthz() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "ok")
}

#[derive(Serialize)]
pub struct PingResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

#[derive(Serialize)]
pub struct SystemInfo {
    pub version: &'static str,
    pub build_time: &'static str,
    pub hostname: String,
    pub network_cidr: Option<String>,
    pub container_count: usize,
}

pub async fn info(State(state): State<AppState>) -> Json<SystemInfo> {
    let container_count = state.lifecycle.list_containers().await.len();
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    Json(SystemInfo {
        version: env!("GIT_VERSION"),
        build_time: env!("BUILD_TIME"),
        hostname,
        network_cidr: state.config.network_cidr.clone(),
        container_count,
    })
}

pub async fn certs(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let certs = state.proxy.export_certificates().await?;
    Ok(Json(certs))
}
