//! Maintenance listener: a TLS-terminating HTTP responder that always
//! serves a 503 page (or the JSON status at `/status`). It is only ever
//! reachable from the outside while the sentinel is in MAINTENANCE mode —
//! in PROXY mode, `DnatController` redirects the same inbound ports to the
//! backend at the kernel level before a packet ever reaches this listener.
//!
//! Hand-rolled rather than built on `axum`: axum's `serve` takes a
//! `tokio::net::TcpListener` directly in this workspace's axum version,
//! with no seam for a custom TLS acceptor without pulling in a separate
//! TLS-serving crate this pack doesn't otherwise use. A single-route,
//! read-only responder is cheap to hand-roll the same way `devplane-server`
//! hand-rolls its binary RPC framing instead of reaching for a heavier
//! abstraction it doesn't need.

use std::sync::Arc;

use rustls::ServerConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::cert_store::SniResolver;
use crate::state::SentinelState;

pub async fn serve(listener: TcpListener, state: Arc<SentinelState>) -> anyhow::Result<()> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut server_config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| anyhow::anyhow!("negotiating TLS protocol versions: {e}"))?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniResolver(state.cert_store.clone())));
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    loop {
        let (socket, peer) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket, acceptor, state).await {
                tracing::debug!(%peer, error = %err, "maintenance connection ended");
            }
        });
    }
}

async fn handle_connection(
    socket: tokio::net::TcpStream,
    acceptor: TlsAcceptor,
    state: Arc<SentinelState>,
) -> anyhow::Result<()> {
    let mut tls = acceptor.accept(socket).await?;

    let mut buf = [0u8; 4096];
    let n = tls.read(&mut buf).await?;
    let request_line = String::from_utf8_lossy(&buf[..n]);
    let path = request_line.split_whitespace().nth(1).unwrap_or("/");

    let response = if path == "/status" {
        let status = status_body(&state).await;
        let body = serde_json::to_string(&status)?;
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    } else {
        let body = MAINTENANCE_PAGE;
        format!(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    };

    tls.write_all(response.as_bytes()).await?;
    tls.shutdown().await?;
    Ok(())
}

async fn status_body(state: &SentinelState) -> devplane_types::models::SentinelStatus {
    devplane_types::models::SentinelStatus {
        mode: state.mode().await,
        backend_internal_ip: state.config.backend_internal_ip.clone(),
        forwarded_ports: state.config.forwarded_ports.clone(),
        preemption_count: state.preemption_count(),
        last_preemption_at: state.last_preemption_at().await,
        current_outage_duration_secs: state.current_outage_duration().await.map(|d| d.num_seconds()),
        cert_count: state.cert_store.cert_count(),
        last_cert_sync_at: state.cert_store.last_fetched_at(),
    }
}

const MAINTENANCE_PAGE: &str = "<!doctype html><html><head><title>Maintenance</title></head>\
<body><h1>Temporarily unavailable</h1><p>The backend is recovering from an interruption. Please try again shortly.</p></body></html>";
