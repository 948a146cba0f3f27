//! C7 — Container Lifecycle Engine.
//!
//! Drives the DevBox state machine (CREATING → RUNNING/ERROR, RUNNING ↔
//! STOPPED, delete-with-cascade). Every mutating operation on a username
//! serializes through `DevboxLocks`, held only long enough to validate and
//! either perform a fast-path synchronous step or hand off to a detached
//! task — never across a slow adapter call while still holding the lock
//! for anything but the initial dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::RwLock;

use devplane_types::models::{
    Devbox, DevboxResources, DevboxState, EventKind, ResourceType, is_valid_username,
};
use devplane_types::{AppError, AppResult};

use crate::acl::{AclContext, NetworkAclEngine};
use crate::adapters::hypervisor::{ContainerConfig, ContainerMetrics, HypervisorAdapter};
use crate::event_bus::EventBus;
use crate::locks::DevboxLocks;
use crate::persistence::audit::AuditLog;
use crate::persistence::collaborators::CollaboratorsRepository;

const NETWORK_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// How a caller wants `create_container` to behave: block for the full
/// creation (bounded by `deadline`) or return immediately with a `CREATING`
/// descriptor while the work continues in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Synchronous,
    Asynchronous,
}

/// Everything needed to create a DevBox. `ssh_keys` are installed into
/// `~/.ssh/authorized_keys`; `enable_docker` additionally provisions a
/// nested container runtime.
#[derive(Debug, Clone)]
pub struct CreateContainerRequest {
    pub username: String,
    pub resources: DevboxResources,
    pub image: String,
    pub ssh_keys: Vec<String>,
    pub enable_docker: bool,
    pub force: bool,
}

/// In-memory, best-effort view of DevBox descriptors, refreshed on demand.
/// Authoritative state always lives in the hypervisor; this cache only
/// exists so `GetContainer`/`ListContainers` don't need a live adapter
/// round trip for every poll from an async client.
#[derive(Default)]
struct DevboxCache {
    entries: RwLock<HashMap<String, Devbox>>,
}

impl DevboxCache {
    async fn get(&self, username: &str) -> Option<Devbox> {
        self.entries.read().await.get(username).cloned()
    }

    async fn put(&self, devbox: Devbox) {
        self.entries.write().await.insert(devbox.username.clone(), devbox);
    }

    async fn remove(&self, username: &str) {
        self.entries.write().await.remove(username);
    }

    async fn list(&self) -> Vec<Devbox> {
        self.entries.read().await.values().cloned().collect()
    }
}

pub struct LifecycleEngine {
    hypervisor: Arc<dyn HypervisorAdapter>,
    acl_engine: Arc<NetworkAclEngine>,
    event_bus: EventBus,
    locks: DevboxLocks,
    cache: DevboxCache,
    collaborators: Arc<dyn CollaboratorsRepository>,
    audit: Arc<dyn AuditLog>,
    proxy_source_ip: String,
    create_deadline: Duration,
}

impl LifecycleEngine {
    pub fn new(
        hypervisor: Arc<dyn HypervisorAdapter>,
        acl_engine: Arc<NetworkAclEngine>,
        event_bus: EventBus,
        collaborators: Arc<dyn CollaboratorsRepository>,
        audit: Arc<dyn AuditLog>,
        proxy_source_ip: String,
    ) -> Self {
        Self {
            hypervisor,
            acl_engine,
            event_bus,
            locks: DevboxLocks::default(),
            cache: DevboxCache::default(),
            collaborators,
            audit,
            proxy_source_ip,
            create_deadline: Duration::from_secs(15 * 60),
        }
    }

    pub async fn get_container(&self, username: &str) -> AppResult<Option<Devbox>> {
        if let Some(devbox) = self.cache.get(username).await {
            return Ok(Some(devbox));
        }
        let Some(descriptor) = self.hypervisor.get_container(&container_name(username)).await? else {
            return Ok(None);
        };
        let devbox = Devbox {
            username: username.to_string(),
            state: descriptor.state,
            ip_address: descriptor.ip_address,
            resources: DevboxResources { cpu: String::new(), memory: String::new(), disk: String::new(), gpu: None },
            image: String::new(),
            ssh_keys: Vec::new(),
            labels: HashMap::new(),
            docker_enabled: false,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            error_message: None,
        };
        self.cache.put(devbox.clone()).await;
        Ok(Some(devbox))
    }

    pub async fn list_containers(&self) -> Vec<Devbox> {
        self.cache.list().await
    }

    /// Creates a DevBox. In `Synchronous` mode this blocks until RUNNING or
    /// ERROR (bounded by `create_deadline`); in `Asynchronous` mode it
    /// returns a CREATING descriptor immediately and continues the work in
    /// a detached task.
    pub async fn create_container(
        self: &Arc<Self>,
        request: CreateContainerRequest,
        mode: RequestMode,
    ) -> AppResult<Devbox> {
        if !is_valid_username(&request.username) {
            return Err(AppError::invalid_argument(format!("invalid username: {}", request.username)));
        }

        let lock = self.locks.get(&request.username);
        let _guard = lock.lock().await;

        if let Some(existing) = self.get_container(&request.username).await? {
            if !request.force {
                return Err(AppError::already_exists(format!(
                    "devbox for {} already exists",
                    request.username
                )));
            }
            self.delete_container(&request.username, true).await?;
        }

        let devbox = Devbox {
            username: request.username.clone(),
            state: DevboxState::Creating,
            ip_address: None,
            resources: request.resources.clone(),
            image: request.image.clone(),
            ssh_keys: request.ssh_keys.clone(),
            labels: HashMap::new(),
            docker_enabled: request.enable_docker,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            error_message: None,
        };
        self.cache.put(devbox.clone()).await;
        self.event_bus.publish(
            ResourceType::Container,
            &request.username,
            EventKind::ContainerCreated,
            json!({"username": request.username, "state": "CREATING"}),
        );

        match mode {
            RequestMode::Synchronous => {
                let engine = Arc::clone(self);
                let username = request.username.clone();
                tokio::time::timeout(self.create_deadline, engine.run_create(request))
                    .await
                    .map_err(|_| AppError::deadline_exceeded(format!("creating devbox for {username}")))??;
                self.get_container(&username)
                    .await?
                    .ok_or_else(|| AppError::internal("devbox vanished after create"))
            }
            RequestMode::Asynchronous => {
                let engine = Arc::clone(self);
                let username = request.username.clone();
                tokio::spawn(async move {
                    if let Err(err) = engine.run_create(request).await {
                        tracing::warn!(username, error = %err, "devbox creation failed");
                    }
                });
                Ok(devbox)
            }
        }
    }

    async fn run_create(&self, request: CreateContainerRequest) -> AppResult<()> {
        let name = container_name(&request.username);
        let outcome = self.run_create_inner(&request, &name).await;
        match outcome {
            Ok(ip_address) => {
                if let Some(mut devbox) = self.cache.get(&request.username).await {
                    devbox.state = DevboxState::Running;
                    devbox.ip_address = Some(ip_address);
                    devbox.updated_at = chrono::Utc::now();
                    self.cache.put(devbox).await;
                }
                self.audit
                    .append(
                        ResourceType::Container,
                        &request.username,
                        EventKind::ContainerStateChanged,
                        json!({"state": "RUNNING"}),
                    )
                    .await
                    .ok();
                self.event_bus.publish(
                    ResourceType::Container,
                    &request.username,
                    EventKind::ContainerStateChanged,
                    json!({"state": "RUNNING"}),
                );
                Ok(())
            }
            Err(err) => {
                self.teardown_best_effort(&name).await;
                if let Some(mut devbox) = self.cache.get(&request.username).await {
                    devbox.state = DevboxState::Error;
                    devbox.error_message = Some(err.message.clone());
                    devbox.updated_at = chrono::Utc::now();
                    self.cache.put(devbox).await;
                }
                self.audit
                    .append(
                        ResourceType::Container,
                        &request.username,
                        EventKind::ContainerStateChanged,
                        json!({"state": "ERROR", "reason": err.message}),
                    )
                    .await
                    .ok();
                self.event_bus.publish(
                    ResourceType::Container,
                    &request.username,
                    EventKind::ContainerStateChanged,
                    json!({"state": "ERROR", "reason": err.message}),
                );
                Err(err)
            }
        }
    }

    async fn run_create_inner(&self, request: &CreateContainerRequest, name: &str) -> AppResult<String> {
        self.hypervisor
            .create_container(&ContainerConfig {
                name: name.to_string(),
                image: request.image.clone(),
                resources: request.resources.clone(),
            })
            .await?;
        self.hypervisor.start_container(name).await?;
        let ip_address = self.hypervisor.wait_for_network(name, NETWORK_READY_TIMEOUT).await?;
        self.install_ssh_keys(name, &request.ssh_keys).await?;
        if request.enable_docker {
            self.enable_container_runtime(name).await?;
        }
        let ctx = AclContext { proxy_source_ip: self.proxy_source_ip.clone(), app_port: None };
        self.acl_engine
            .apply(name, devplane_types::models::AclPreset::FullIsolation, &ctx, None)
            .await?;
        Ok(ip_address)
    }

    async fn install_ssh_keys(&self, name: &str, keys: &[String]) -> AppResult<()> {
        self.hypervisor
            .exec(name, &["mkdir".into(), "-p".into(), "-m".into(), "700".into(), "/root/.ssh".into()])
            .await?;
        let joined = keys.join("\n");
        self.hypervisor
            .write_file(name, "/root/.ssh/authorized_keys", joined.as_bytes(), 0o600)
            .await?;
        Ok(())
    }

    async fn enable_container_runtime(&self, name: &str) -> AppResult<()> {
        self.hypervisor
            .exec(name, &["sh".into(), "-c".into(), "curl -fsSL https://get.docker.com | sh".into()])
            .await
            .map(|_| ())
    }

    async fn teardown_best_effort(&self, name: &str) {
        let _ = self.hypervisor.stop_container(name, true).await;
        let _ = self.hypervisor.delete_container(name).await;
    }

    pub async fn start_container(&self, username: &str) -> AppResult<()> {
        let lock = self.locks.get(username);
        let _guard = lock.lock().await;
        let name = container_name(username);
        self.hypervisor.start_container(&name).await?;
        self.transition(username, DevboxState::Running).await;
        Ok(())
    }

    pub async fn stop_container(&self, username: &str, force: bool) -> AppResult<()> {
        let lock = self.locks.get(username);
        let _guard = lock.lock().await;
        let name = container_name(username);
        self.hypervisor.stop_container(&name, force).await?;
        self.transition(username, DevboxState::Stopped).await;
        Ok(())
    }

    async fn transition(&self, username: &str, state: DevboxState) {
        if let Some(mut devbox) = self.cache.get(username).await {
            devbox.state = state;
            devbox.updated_at = chrono::Utc::now();
            self.cache.put(devbox).await;
        }
        self.event_bus.publish(
            ResourceType::Container,
            username,
            EventKind::ContainerStateChanged,
            json!({"state": format!("{state:?}").to_uppercase()}),
        );
    }

    /// Rejects a disk shrink below current usage with `FAILED_PRECONDITION`.
    /// Current usage isn't tracked by this engine directly — it is read
    /// from the hypervisor's own accounting via `exec(df)` by the caller
    /// wiring this into the RPC handler; this method trusts the caller's
    /// `current_disk_usage_bytes` snapshot.
    pub async fn resize_container(
        &self,
        username: &str,
        resources: DevboxResources,
        current_disk_usage_bytes: Option<u64>,
        requested_disk_bytes: Option<u64>,
    ) -> AppResult<()> {
        let lock = self.locks.get(username);
        let _guard = lock.lock().await;
        let devbox = self
            .get_container(username)
            .await?
            .ok_or_else(|| AppError::not_found(format!("no devbox for {username}")))?;
        if !matches!(devbox.state, DevboxState::Running | DevboxState::Stopped) {
            return Err(AppError::failed_precondition(format!(
                "cannot resize devbox in state {:?}",
                devbox.state
            )));
        }
        if let (Some(current), Some(requested)) = (current_disk_usage_bytes, requested_disk_bytes) {
            if requested < current {
                return Err(AppError::failed_precondition("disk shrink below current usage"));
            }
        }
        let name = container_name(username);
        self.hypervisor.apply_resources(&name, &resources).await?;
        if let Some(mut devbox) = self.cache.get(username).await {
            devbox.resources = resources;
            devbox.updated_at = chrono::Utc::now();
            self.cache.put(devbox).await;
        }
        Ok(())
    }

    /// Deletes a DevBox, cascading to its collaborators. Apps owned by this
    /// DevBox (and their routes) are torn down by the App pipeline's own
    /// delete path before this is called; this only removes the
    /// collaborators that reference the container directly, plus the
    /// container itself.
    pub async fn delete_container(&self, username: &str, force: bool) -> AppResult<()> {
        let lock = self.locks.get(username);
        let _guard = lock.lock().await;
        let name = container_name(username);

        self.collaborators.delete_all_for_container(&name).await?;

        self.hypervisor.stop_container(&name, force).await.ok();
        self.hypervisor.delete_container(&name).await?;
        self.cache.remove(username).await;

        self.audit
            .append(ResourceType::Container, username, EventKind::ContainerDeleted, json!({}))
            .await
            .ok();
        self.event_bus.publish(ResourceType::Container, username, EventKind::ContainerDeleted, json!({}));
        Ok(())
    }

    /// Merges `labels` onto the DevBox, a 5s-deadline metadata op (§6).
    pub async fn set_labels(&self, username: &str, labels: HashMap<String, String>) -> AppResult<Devbox> {
        let name = container_name(username);
        for (key, value) in &labels {
            self.hypervisor.set_label(&name, key, value).await?;
        }
        let devbox = self.merge_labels(username, labels).await?;
        self.event_bus.publish(
            ResourceType::Container,
            username,
            EventKind::ContainerLabelsChanged,
            json!({"labels": devbox.labels}),
        );
        Ok(devbox)
    }

    pub async fn remove_label(&self, username: &str, key: &str) -> AppResult<Devbox> {
        let name = container_name(username);
        self.hypervisor.remove_label(&name, key).await?;
        let mut devbox = match self.cache.get(username).await {
            Some(devbox) => devbox,
            None => self
                .get_container(username)
                .await?
                .ok_or_else(|| AppError::not_found(format!("no devbox for {username}")))?,
        };
        devbox.labels.remove(key);
        devbox.updated_at = chrono::Utc::now();
        self.cache.put(devbox.clone()).await;
        self.event_bus.publish(
            ResourceType::Container,
            username,
            EventKind::ContainerLabelsChanged,
            json!({"labels": devbox.labels}),
        );
        Ok(devbox)
    }

    async fn merge_labels(&self, username: &str, labels: HashMap<String, String>) -> AppResult<Devbox> {
        let mut devbox = match self.cache.get(username).await {
            Some(devbox) => devbox,
            None => self
                .get_container(username)
                .await?
                .ok_or_else(|| AppError::not_found(format!("no devbox for {username}")))?,
        };
        devbox.labels.extend(labels);
        devbox.updated_at = chrono::Utc::now();
        self.cache.put(devbox.clone()).await;
        Ok(devbox)
    }

    /// CPU/memory/disk usage snapshot for `GetMetrics`, read straight from
    /// the hypervisor — unlike the descriptor view this is never cached.
    pub async fn get_metrics(&self, username: &str) -> AppResult<ContainerMetrics> {
        let name = container_name(username);
        self.hypervisor.metrics(&name).await
    }
}

pub fn container_name(username: &str) -> String {
    format!("{username}-container")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::NetworkAclEngine;
    use crate::adapters::hypervisor::{ContainerDescriptor, ContainerMetrics, ExecResult, ShellStream};
    use crate::persistence::audit::PgAuditLog;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeHypervisor {
        containers: StdMutex<HashMap<String, ContainerDescriptor>>,
    }

    #[async_trait]
    impl HypervisorAdapter for FakeHypervisor {
        async fn create_container(&self, config: &ContainerConfig) -> AppResult<()> {
            self.containers.lock().unwrap().insert(
                config.name.clone(),
                ContainerDescriptor { name: config.name.clone(), state: DevboxState::Stopped, ip_address: None },
            );
            Ok(())
        }
        async fn start_container(&self, name: &str) -> AppResult<()> {
            if let Some(c) = self.containers.lock().unwrap().get_mut(name) {
                c.state = DevboxState::Running;
                c.ip_address = Some("10.0.0.5".to_string());
            }
            Ok(())
        }
        async fn stop_container(&self, name: &str, _force: bool) -> AppResult<()> {
            if let Some(c) = self.containers.lock().unwrap().get_mut(name) {
                c.state = DevboxState::Stopped;
            }
            Ok(())
        }
        async fn delete_container(&self, name: &str) -> AppResult<()> {
            self.containers.lock().unwrap().remove(name);
            Ok(())
        }
        async fn get_container(&self, name: &str) -> AppResult<Option<ContainerDescriptor>> {
            Ok(self.containers.lock().unwrap().get(name).cloned())
        }
        async fn wait_for_network(&self, name: &str, _timeout: Duration) -> AppResult<String> {
            Ok(self.containers.lock().unwrap().get(name).and_then(|c| c.ip_address.clone()).unwrap_or_default())
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
            Err(AppError::internal("not supported in fake"))
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

    fn make_engine() -> Arc<LifecycleEngine> {
        let hypervisor: Arc<dyn HypervisorAdapter> = Arc::new(FakeHypervisor::default());
        let acl_engine = Arc::new(NetworkAclEngine::new(Arc::clone(&hypervisor)));
        let collaborators = Arc::new(crate::persistence::collaborators::memory::InMemoryCollaboratorsRepository::default());
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/devplane").unwrap();
        let audit: Arc<dyn AuditLog> = Arc::new(PgAuditLog::new(pool));
        Arc::new(LifecycleEngine::new(
            hypervisor,
            acl_engine,
            EventBus::new(),
            collaborators,
            audit,
            "10.1.0.1".to_string(),
        ))
    }

    #[tokio::test]
    async fn create_then_get_reports_running_with_ip() {
        let engine = make_engine();
        let devbox = engine
            .create_container(
                CreateContainerRequest {
                    username: "bob".to_string(),
                    resources: DevboxResources { cpu: "2".into(), memory: "4GB".into(), disk: "20GB".into(), gpu: None },
                    image: "ubuntu:22.04".to_string(),
                    ssh_keys: vec!["ssh-ed25519 AAAA".to_string()],
                    enable_docker: false,
                    force: false,
                },
                RequestMode::Synchronous,
            )
            .await
            .unwrap();
        assert_eq!(devbox.state, DevboxState::Running);
        assert!(devbox.ip_address.is_some());
    }

    #[tokio::test]
    async fn duplicate_create_without_force_is_already_exists() {
        let engine = make_engine();
        let request = CreateContainerRequest {
            username: "carol".to_string(),
            resources: DevboxResources { cpu: "1".into(), memory: "2GB".into(), disk: "10GB".into(), gpu: None },
            image: "ubuntu:22.04".to_string(),
            ssh_keys: vec![],
            enable_docker: false,
            force: false,
        };
        engine.clone().create_container(request.clone(), RequestMode::Synchronous).await.unwrap();
        let err = engine.create_container(request, RequestMode::Synchronous).await.unwrap_err();
        assert_eq!(err.kind, devplane_types::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn delete_removes_from_cache() {
        let engine = make_engine();
        let request = CreateContainerRequest {
            username: "dana".to_string(),
            resources: DevboxResources { cpu: "1".into(), memory: "2GB".into(), disk: "10GB".into(), gpu: None },
            image: "ubuntu:22.04".to_string(),
            ssh_keys: vec![],
            enable_docker: false,
            force: false,
        };
        engine.clone().create_container(request, RequestMode::Synchronous).await.unwrap();
        engine.delete_container("dana", true).await.unwrap();
        assert!(engine.get_container("dana").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resize_rejects_disk_shrink_below_usage() {
        let engine = make_engine();
        let request = CreateContainerRequest {
            username: "erin".to_string(),
            resources: DevboxResources { cpu: "1".into(), memory: "2GB".into(), disk: "10GB".into(), gpu: None },
            image: "ubuntu:22.04".to_string(),
            ssh_keys: vec![],
            enable_docker: false,
            force: false,
        };
        engine.clone().create_container(request, RequestMode::Synchronous).await.unwrap();
        let result = engine
            .resize_container(
                "erin",
                DevboxResources { cpu: "1".into(), memory: "2GB".into(), disk: "5GB".into(), gpu: None },
                Some(8_000_000_000),
                Some(5_000_000_000),
            )
            .await;
        assert_eq!(result.unwrap_err().kind, devplane_types::ErrorKind::FailedPrecondition);
    }

    #[tokio::test]
    async fn set_and_remove_labels_round_trip() {
        let engine = make_engine();
        let request = CreateContainerRequest {
            username: "frank".to_string(),
            resources: DevboxResources { cpu: "1".into(), memory: "2GB".into(), disk: "10GB".into(), gpu: None },
            image: "ubuntu:22.04".to_string(),
            ssh_keys: vec![],
            enable_docker: false,
            force: false,
        };
        engine.clone().create_container(request, RequestMode::Synchronous).await.unwrap();

        let mut labels = HashMap::new();
        labels.insert("team".to_string(), "platform".to_string());
        let devbox = engine.set_labels("frank", labels).await.unwrap();
        assert_eq!(devbox.labels.get("team"), Some(&"platform".to_string()));

        let devbox = engine.remove_label("frank", "team").await.unwrap();
        assert!(!devbox.labels.contains_key("team"));
    }

    #[tokio::test]
    async fn metrics_returns_a_snapshot() {
        let engine = make_engine();
        let request = CreateContainerRequest {
            username: "gina".to_string(),
            resources: DevboxResources { cpu: "1".into(), memory: "2GB".into(), disk: "10GB".into(), gpu: None },
            image: "ubuntu:22.04".to_string(),
            ssh_keys: vec![],
            enable_docker: false,
            force: false,
        };
        engine.clone().create_container(request, RequestMode::Synchronous).await.unwrap();
        let metrics = engine.get_metrics("gina").await.unwrap();
        assert_eq!(metrics.memory_used_bytes, 0);
    }
}
