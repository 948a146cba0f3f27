//! Shared application state, threaded through every handler as an
//! `axum::extract::State`. Mirrors this codebase's `Arc<AppStateInner>`
//! shape: one `Arc` clone per connection, the actual fields behind it.

use std::sync::Arc;

use dashmap::DashMap;
use sqlx::PgPool;

use devplane_core::acl::NetworkAclEngine;
use devplane_core::adapters::dns::{DnsProviderAdapter, HttpDnsProviderAdapter};
use devplane_core::adapters::hypervisor::{HypervisorAdapter, LxcHypervisorAdapter};
use devplane_core::adapters::proxy::{HttpProxyAdapter, ProxyAdapter};
use devplane_core::auth::TokenAuthenticator;
use devplane_core::config::{load_signing_secret, DnsProviderConfig};
use devplane_core::event_bus::EventBus;
use devplane_core::lifecycle::LifecycleEngine;
use devplane_core::persistence::apps::{AppsRepository, PgAppsRepository};
use devplane_core::persistence::audit::{AuditLog, PgAuditLog};
use devplane_core::persistence::collaborators::{CollaboratorsRepository, PgCollaboratorsRepository};
use devplane_core::persistence::routes::{PgRoutesRepository, RoutesRepository};
use devplane_core::pipeline::AppPipeline;
use devplane_types::models::NetworkAcl;
use devplane_types::AppResult;

use crate::config::DaemonConfig;

#[derive(Clone)]
pub struct AppState(pub Arc<AppStateInner>);

pub struct AppStateInner {
    pub config: DaemonConfig,
    pub token_authenticator: TokenAuthenticator,
    pub event_bus: EventBus,
    pub lifecycle: Arc<LifecycleEngine>,
    pub pipeline: Arc<AppPipeline>,
    pub acl_engine: Arc<NetworkAclEngine>,
    pub hypervisor: Arc<dyn HypervisorAdapter>,
    pub dns: Arc<dyn DnsProviderAdapter>,
    pub proxy: Arc<dyn ProxyAdapter>,
    pub apps: Arc<dyn AppsRepository>,
    pub collaborators: Arc<dyn CollaboratorsRepository>,
    pub routes: Arc<dyn RoutesRepository>,
    pub audit: Arc<dyn AuditLog>,
    /// Last ACL applied per container name; advisory read-back for
    /// `GetContainerACL`, not consulted by enforcement (the hypervisor's
    /// installed nftables ruleset is the canonical authority).
    pub acl_cache: DashMap<String, NetworkAcl>,
}

impl std::ops::Deref for AppState {
    type Target = AppStateInner;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AppState {
    pub async fn build(config: DaemonConfig) -> AppResult<Self> {
        let pool = PgPool::connect(&config.database_url)
            .await
            .map_err(|e| devplane_types::AppError::unavailable(format!("connecting to database: {e}")))?;
        devplane_core::persistence::run_migrations(&pool).await?;

        let secret = load_signing_secret(&config.token_signing_secret_path)?;
        let token_authenticator =
            TokenAuthenticator::new(secret, "devplane").with_max_expiry(config.max_token_expiry());

        let hypervisor: Arc<dyn HypervisorAdapter> = Arc::new(LxcHypervisorAdapter::new(
            config.hypervisor_binary.clone().unwrap_or_else(|| "lxc".to_string()),
        ));

        let dns: Arc<dyn DnsProviderAdapter> = match &config.dns {
            Some(DnsProviderConfig { provider, domain, credentials, .. }) => {
                Arc::new(HttpDnsProviderAdapter::new(
                    format!("https://api.{provider}.example.com/v2/domains/{domain}"),
                    credentials.clone(),
                ))
            }
            None => Arc::new(HttpDnsProviderAdapter::new(
                "https://api.digitalocean.com/v2/domains".to_string(),
                devplane_core::config::DnsCredentials { api_key: None, api_secret: None, api_token: None },
            )),
        };

        let proxy: Arc<dyn ProxyAdapter> = Arc::new(HttpProxyAdapter::new(config.proxy_admin_url.clone()));

        let apps: Arc<dyn AppsRepository> = Arc::new(PgAppsRepository::new(pool.clone()));
        let collaborators: Arc<dyn CollaboratorsRepository> =
            Arc::new(PgCollaboratorsRepository::new(pool.clone()));
        let routes: Arc<dyn RoutesRepository> = Arc::new(PgRoutesRepository::new(pool.clone()));
        let audit: Arc<dyn AuditLog> = Arc::new(PgAuditLog::new(pool.clone()));

        let event_bus = EventBus::new();
        let acl_engine = Arc::new(NetworkAclEngine::new(hypervisor.clone()));

        let lifecycle = Arc::new(LifecycleEngine::new(
            hypervisor.clone(),
            acl_engine.clone(),
            event_bus.clone(),
            collaborators.clone(),
            audit.clone(),
            config.proxy_source_ip.clone(),
        ));

        let pipeline = Arc::new(AppPipeline::new(
            hypervisor.clone(),
            proxy.clone(),
            apps.clone(),
            routes.clone(),
            event_bus.clone(),
            audit.clone(),
        ));

        Ok(Self(Arc::new(AppStateInner {
            config,
            token_authenticator,
            event_bus,
            lifecycle,
            pipeline,
            acl_engine,
            hypervisor,
            dns,
            proxy,
            apps,
            collaborators,
            routes,
            audit,
            acl_cache: DashMap::new(),
        })))
    }
}
