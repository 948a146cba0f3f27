//! Test-only harness: builds a real [`AppState`](crate::state::AppState)
//! wired to in-memory repository fakes and no-op adapters, bypassing
//! `AppState::build`'s Postgres connection and migration run entirely.
//! Mirrors this codebase's own `create_test_app_state` helper next to its
//! axum-test integration tests. Only compiled for `cfg(test)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use devplane_core::acl::NetworkAclEngine;
use devplane_core::adapters::dns::DnsProviderAdapter;
use devplane_core::adapters::hypervisor::{
    ContainerConfig, ContainerDescriptor, ContainerMetrics, ExecResult, HypervisorAdapter, ShellStream,
};
use devplane_core::adapters::proxy::{ExportedCertificate, ProxyAdapter, RouteDescriptor};
use devplane_core::auth::TokenAuthenticator;
use devplane_core::event_bus::EventBus;
use devplane_core::lifecycle::LifecycleEngine;
use devplane_core::persistence::apps::memory::InMemoryAppsRepository;
use devplane_core::persistence::audit::memory::InMemoryAuditLog;
use devplane_core::persistence::collaborators::memory::InMemoryCollaboratorsRepository;
use devplane_core::persistence::routes::memory::InMemoryRoutesRepository;
use devplane_core::pipeline::AppPipeline;
use devplane_types::models::{DevboxResources, Protocol};
use devplane_types::AppResult;

use crate::config::DaemonConfig;
use crate::state::{AppState, AppStateInner};

/// A hypervisor fake that never reaches a real `lxc` binary. `exec`/
/// `write_file` (used by the ACL engine's nftables install) succeed
/// unconditionally; `attach_shell` panics, since no REST gateway test in
/// this codebase exercises the shell upgrade.
#[derive(Default)]
pub struct FakeHypervisor;

#[async_trait]
impl HypervisorAdapter for FakeHypervisor {
    async fn create_container(&self, _config: &ContainerConfig) -> AppResult<()> {
        Ok(())
    }

    async fn start_container(&self, _name: &str) -> AppResult<()> {
        Ok(())
    }

    async fn stop_container(&self, _name: &str, _force: bool) -> AppResult<()> {
        Ok(())
    }

    async fn delete_container(&self, _name: &str) -> AppResult<()> {
        Ok(())
    }

    async fn get_container(&self, _name: &str) -> AppResult<Option<ContainerDescriptor>> {
        Ok(None)
    }

    async fn wait_for_network(&self, _name: &str, _timeout: Duration) -> AppResult<String> {
        Ok("10.0.0.2".to_string())
    }

    async fn exec(&self, _name: &str, _argv: &[String]) -> AppResult<ExecResult> {
        Ok(ExecResult { exit_code: 0, stdout: Vec::new(), stderr: Vec::new() })
    }

    async fn write_file(&self, _name: &str, _path: &str, _bytes: &[u8], _mode: u32) -> AppResult<()> {
        Ok(())
    }

    async fn read_file(&self, _name: &str, _path: &str) -> AppResult<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn attach_shell(&self, _name: &str) -> AppResult<Box<dyn ShellStream>> {
        unimplemented!("no REST gateway test exercises the shell upgrade")
    }

    async fn apply_resources(&self, _name: &str, _resources: &DevboxResources) -> AppResult<()> {
        Ok(())
    }

    async fn set_label(&self, _name: &str, _key: &str, _value: &str) -> AppResult<()> {
        Ok(())
    }

    async fn remove_label(&self, _name: &str, _key: &str) -> AppResult<()> {
        Ok(())
    }

    async fn metrics(&self, _name: &str) -> AppResult<ContainerMetrics> {
        Ok(ContainerMetrics::default())
    }
}

#[derive(Default)]
pub struct FakeDns;

#[async_trait]
impl DnsProviderAdapter for FakeDns {
    async fn verify_credentials(&self) -> AppResult<()> {
        Ok(())
    }

    async fn verify_domain(&self, _domain: &str) -> AppResult<()> {
        Ok(())
    }

    async fn setup_hosting_records(&self, _domain: &str, _server_ip: &str, _include_wildcard: bool) -> AppResult<()> {
        Ok(())
    }
}

/// Records upserted routes so tests can assert on what the gateway sent
/// downstream, without a real reverse-proxy admin API.
#[derive(Default)]
pub struct FakeProxy {
    pub http_routes: std::sync::Mutex<HashMap<String, (String, u16)>>,
}

#[async_trait]
impl ProxyAdapter for FakeProxy {
    async fn upsert_http_route(&self, domain: &str, target_ip: &str, port: u16) -> AppResult<()> {
        self.http_routes.lock().unwrap().insert(domain.to_string(), (target_ip.to_string(), port));
        Ok(())
    }

    async fn delete_http_route(&self, domain: &str) -> AppResult<()> {
        self.http_routes.lock().unwrap().remove(domain);
        Ok(())
    }

    async fn upsert_passthrough(
        &self,
        _external_port: u16,
        _protocol: Protocol,
        _target_ip: &str,
        _target_port: u16,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn delete_passthrough(&self, _external_port: u16, _protocol: Protocol) -> AppResult<()> {
        Ok(())
    }

    async fn list_routes(&self) -> AppResult<Vec<RouteDescriptor>> {
        Ok(self
            .http_routes
            .lock()
            .unwrap()
            .iter()
            .map(|(domain, (ip, port))| RouteDescriptor {
                full_domain: domain.clone(),
                target_ip: ip.clone(),
                target_port: *port,
            })
            .collect())
    }

    async fn export_certificates(&self) -> AppResult<Vec<ExportedCertificate>> {
        Ok(Vec::new())
    }
}

pub const SIGNING_SECRET: &[u8] = b"test-signing-secret-not-for-production-use";

/// Builds an `AppState` with every repository/adapter backed by an
/// in-memory fake. The REST gateway's routing, auth middleware, and
/// handler logic don't need a real database or hypervisor to exercise.
pub fn test_state() -> AppState {
    let config = DaemonConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        rpc_bind_addr: "127.0.0.1:0".to_string(),
        database_url: String::new(),
        base_domain: "apps.example.com".to_string(),
        token_signing_secret_path: "/dev/null".into(),
        max_token_expiry_hours: Some(1),
        dns: None,
        proxy_admin_url: "http://127.0.0.1:0".to_string(),
        proxy_source_ip: "10.1.0.1".to_string(),
        hypervisor_binary: None,
        network_cidr: Some("10.0.0.0/16".to_string()),
    };

    let token_authenticator =
        TokenAuthenticator::new(SIGNING_SECRET.to_vec(), "devplane-test").with_max_expiry(chrono::Duration::hours(1));

    let hypervisor: Arc<dyn HypervisorAdapter> = Arc::new(FakeHypervisor);
    let dns: Arc<dyn DnsProviderAdapter> = Arc::new(FakeDns);
    let proxy: Arc<dyn ProxyAdapter> = Arc::new(FakeProxy::default());
    let apps = Arc::new(InMemoryAppsRepository::default());
    let collaborators = Arc::new(InMemoryCollaboratorsRepository::default());
    let routes = Arc::new(InMemoryRoutesRepository::default());
    let audit = Arc::new(InMemoryAuditLog::default());

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

    AppState(Arc::new(AppStateInner {
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
    }))
}

pub fn bearer_token(state: &AppState, username: &str, roles: &[&str]) -> String {
    let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
    state.token_authenticator.generate_token(username, &roles, chrono::Duration::minutes(5)).unwrap()
}
