//! `devplane-sentinel` — the HA front-VM binary. Builds the cert store and
//! shared state, then runs five cooperative long-running tasks: the
//! preempt-detect event watcher, the health checker, the cert-sync ticker,
//! the maintenance listener, and the status server. Single-threaded Tokio
//! runtime — this binary's whole job is a small fixed set of cooperating
//! loops, not a thread-per-request server, so the simpler scheduler fits.

mod cert_store;
mod cert_sync;
mod cloud;
mod config;
mod dnat;
mod health;
mod maintenance;
mod preempt;
mod state;
mod status;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::{Mutex, Notify};
use tracing_subscriber::EnvFilter;

use cert_store::CertStore;
use cloud::{CloudProviderAdapter, HttpCloudProviderAdapter};
use config::{Cli, SentinelConfig};
use dnat::DnatController;
use state::SentinelState;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_tracing(&cli);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting devplane-sentinel");

    let config = SentinelConfig::load(&cli.config)?;
    let cert_store = Arc::new(CertStore::new_with_self_signed(&config.self_signed_domain)?);
    let state = Arc::new(SentinelState::new(config, cert_store));

    let dnat = Arc::new(Mutex::new(DnatController::new()));
    dnat.lock()
        .await
        .configure(&state.config.backend_internal_ip, &state.config.forwarded_ports)
        .await?;

    let cert_sync_notify = Arc::new(Notify::new());

    let provider: Box<dyn CloudProviderAdapter> = Box::new(HttpCloudProviderAdapter::new(
        state.config.provider_api_base_url.clone(),
        state.config.provider_instance_id.clone(),
    ));

    let maintenance_listener = tokio::net::TcpListener::bind(&state.config.maintenance_bind_addr).await?;
    tracing::info!(addr = %state.config.maintenance_bind_addr, "maintenance listener bound");
    let status_listener = tokio::net::TcpListener::bind(&state.config.status_bind_addr).await?;
    tracing::info!(addr = %state.config.status_bind_addr, "status server bound");

    let preempt_task = tokio::spawn(preempt::run(state.clone(), provider, dnat.clone(), cert_sync_notify.clone()));
    let health_task = tokio::spawn(health::run(state.clone(), dnat.clone()));
    let cert_sync_task = tokio::spawn(cert_sync::run(state.clone(), cert_sync_notify));
    let maintenance_task = tokio::spawn(maintenance::serve(maintenance_listener, state.clone()));
    let status_router = status::router(state.clone());
    let status_task = tokio::spawn(async move { axum::serve(status_listener, status_router).await });

    tokio::select! {
        result = preempt_task => { result?; }
        result = health_task => { result?; }
        result = cert_sync_task => { result?; }
        result = maintenance_task => { result??; }
        result = status_task => { result??; }
    }

    tracing::info!("devplane-sentinel shutting down");
    Ok(())
}

fn init_tracing(cli: &Cli) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    match &cli.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "devplane-sentinel.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(non_blocking).with_ansi(false).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}
