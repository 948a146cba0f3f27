//! `devplaned` — the DevPlane control-plane daemon. Parses launch
//! arguments, loads the on-disk config, builds [`state::AppState`], then
//! runs the REST/JSON gateway and the binary-framed RPC listener
//! concurrently until either task exits or a shutdown signal arrives.

mod config;
mod error;
mod middleware;
mod rest;
mod rpc;
mod state;
#[cfg(test)]
mod test_support;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::{Cli, Command, DaemonConfig};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting devplaned");

    match cli.command {
        Some(Command::InitSecret) => {
            let config = DaemonConfig::load(&cli.config)?;
            devplane_core::config::generate_signing_secret(&config.token_signing_secret_path)?;
            tracing::info!(path = %config.token_signing_secret_path.display(), "generated signing secret");
            return Ok(());
        }
        Some(Command::Migrate) => {
            let config = DaemonConfig::load(&cli.config)?;
            let pool = sqlx::PgPool::connect(&config.database_url).await?;
            devplane_core::persistence::run_migrations(&pool).await?;
            tracing::info!("migrations applied");
            return Ok(());
        }
        Some(Command::Serve) | None => {}
    }

    let mut config = DaemonConfig::load(&cli.config)?;
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(rpc_bind_addr) = cli.rpc_bind_addr {
        config.rpc_bind_addr = rpc_bind_addr;
    }

    let rest_addr = config.bind_addr.clone();
    let rpc_addr = config.rpc_bind_addr.clone();

    let state = AppState::build(config).await?;

    let rest_listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    tracing::info!(addr = %rest_addr, "REST/JSON gateway listening");
    let rest_router = rest::router(state.clone());
    let rest_task = tokio::spawn(async move {
        axum::serve(rest_listener, rest_router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    let rpc_listener = tokio::net::TcpListener::bind(&rpc_addr).await?;
    tracing::info!(addr = %rpc_addr, "binary RPC listener listening");
    let rpc_state = state.clone();
    let rpc_task = tokio::spawn(async move { rpc::serve(rpc_listener, rpc_state).await });

    tokio::select! {
        result = rest_task => {
            result??;
        }
        result = rpc_task => {
            result??;
        }
    }

    tracing::info!("devplaned shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
