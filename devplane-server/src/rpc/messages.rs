//! Binary RPC envelope. One `bincode`-encoded `RpcRequest` per frame in,
//! one `RpcResponse` per frame out, each frame length-prefixed by
//! `tokio_util::codec::LengthDelimitedCodec`. Every request (besides
//! `Ping`) carries its own bearer token since there is no persistent
//! per-connection auth handshake — this mirrors the REST gateway's own
//! stateless-bearer-token design rather than inventing a session layer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use devplane_types::models::{
    AclPreset, AclRule, App, Collaborator, Devbox, DevboxResources, HttpRoute, NetworkAcl,
    PassthroughRoute, Protocol,
};
use devplane_types::ErrorKind;

#[derive(Debug, Serialize, Deserialize)]
pub enum RpcRequest {
    Ping,
    GetSystemInfo { token: String },
    GenerateToken { username: String, roles: Vec<String>, expires_in_secs: i64 },
    CreateContainer {
        token: String,
        username: String,
        resources: DevboxResources,
        image: String,
        ssh_keys: Vec<String>,
        enable_docker: bool,
        force: bool,
    },
    GetContainer { token: String, username: String },
    ListContainers { token: String },
    StartContainer { token: String, username: String },
    StopContainer { token: String, username: String, force: bool },
    DeleteContainer { token: String, username: String },
    ResizeContainer {
        token: String,
        username: String,
        resources: DevboxResources,
        current_disk_usage_bytes: Option<u64>,
        requested_disk_bytes: Option<u64>,
    },
    SetLabels { token: String, username: String, labels: HashMap<String, String> },
    RemoveLabel { token: String, username: String, key: String },
    GetMetrics { token: String, username: String },
    GetContainerACL { token: String, username: String },
    UpdateContainerACL {
        token: String,
        username: String,
        preset: AclPreset,
        app_port: Option<u16>,
        ingress_overrides: Vec<AclRule>,
        egress_overrides: Vec<AclRule>,
    },
    AddCollaborator {
        token: String,
        username: String,
        collaborator_username: String,
        ssh_public_key: String,
        has_sudo: bool,
        has_container_runtime: bool,
    },
    ListCollaborators { token: String, username: String },
    RemoveCollaborator { token: String, username: String, collaborator_username: String },
    AddRoute { token: String, full_domain: String, target_ip: String, target_port: u16 },
    DeleteRoute { token: String, full_domain: String },
    ListRoutes { token: String },
    AddPassthroughRoute { token: String, external_port: u16, protocol: Protocol, target_ip: String, target_port: u16 },
    DeletePassthroughRoute { token: String, external_port: u16, protocol: Protocol },
    DeployApp {
        token: String,
        app_name: String,
        source_tarball: Vec<u8>,
        file_names: Vec<String>,
        port: u16,
        env_vars: HashMap<String, String>,
        desired_subdomain: Option<String>,
        generate_if_missing: bool,
    },
    GetApp { token: String, username: String, name: String },
    ListApps { token: String },
    StartApp { token: String, username: String, name: String },
    StopApp { token: String, username: String, name: String },
    RestartApp { token: String, username: String, name: String },
    DeleteApp { token: String, username: String, name: String, remove_data: bool },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemInfo {
    pub version: String,
    pub build_time: String,
    pub hostname: String,
    pub network_cidr: Option<String>,
    pub container_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Metrics {
    pub cpu_usage_pct: f64,
    pub memory_used_bytes: u64,
    pub memory_limit_bytes: u64,
    pub disk_used_bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum RpcResponse {
    Pong,
    SystemInfo(SystemInfo),
    Token { token: String },
    Container(Devbox),
    Containers(Vec<Devbox>),
    Acl(NetworkAcl),
    Collaborator(Collaborator),
    Collaborators(Vec<Collaborator>),
    HttpRoute(HttpRoute),
    HttpRoutes(Vec<HttpRoute>),
    PassthroughRoute(PassthroughRoute),
    Metrics(Metrics),
    App(App),
    Apps(Vec<App>),
    Empty,
    Error { kind: ErrorKind, message: String },
}

impl From<devplane_types::AppError> for RpcResponse {
    fn from(err: devplane_types::AppError) -> Self {
        RpcResponse::Error { kind: err.kind, message: err.message }
    }
}
