//! C10's second surface: a raw length-delimited, `bincode`-framed socket,
//! mirroring the `MessageHeader`/envelope shape this pack's STOQ-based
//! networking example uses, minus the QUIC transport this control plane
//! has no need for. Runs alongside the REST/JSON gateway, dispatching
//! into the same `devplane-core` calls the REST handlers use.

mod messages;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use devplane_core::acl::AclContext;
use devplane_core::lifecycle::{container_name, CreateContainerRequest, RequestMode};
use devplane_core::pipeline::DeployAppRequest;
use devplane_types::models::Collaborator;
use devplane_types::{AppError, AppResult};

use crate::state::AppState;
use messages::{Metrics, RpcRequest, RpcResponse, SystemInfo};

pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket, state).await {
                tracing::warn!(%peer, error = %err, "rpc connection ended");
            }
        });
    }
}

async fn handle_connection(socket: TcpStream, state: AppState) -> anyhow::Result<()> {
    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());
    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let request: RpcRequest = match bincode::deserialize(&frame) {
            Ok(request) => request,
            Err(err) => {
                let response = RpcResponse::Error { kind: devplane_types::ErrorKind::InvalidArgument, message: err.to_string() };
                framed.send(bytes::Bytes::from(bincode::serialize(&response)?)).await?;
                continue;
            }
        };
        let response = dispatch(&state, request).await;
        framed.send(bytes::Bytes::from(bincode::serialize(&response)?)).await?;
    }
    Ok(())
}

async fn dispatch(state: &AppState, request: RpcRequest) -> RpcResponse {
    match request {
        RpcRequest::Ping => RpcResponse::Pong,
        RpcRequest::GetSystemInfo { token } => match authenticate(state, &token) {
            Ok(_) => {
                let container_count = state.lifecycle.list_containers().await.len();
                let hostname = hostname::get().ok().and_then(|h| h.into_string().ok()).unwrap_or_else(|| "unknown".to_string());
                RpcResponse::SystemInfo(SystemInfo {
                    version: env!("GIT_VERSION").to_string(),
                    build_time: env!("BUILD_TIME").to_string(),
                    hostname,
                    network_cidr: state.config.network_cidr.clone(),
                    container_count,
                })
            }
            Err(err) => err.into(),
        },
        RpcRequest::GenerateToken { username, roles, expires_in_secs } => {
            match state.token_authenticator.generate_token(&username, &roles, chrono::Duration::seconds(expires_in_secs)) {
                Ok(token) => RpcResponse::Token { token },
                Err(err) => err.into(),
            }
        }
        RpcRequest::CreateContainer { token, username, resources, image, ssh_keys, enable_docker, force } => {
            handle(state, &token, username, |state, username| async move {
                let devbox = state
                    .lifecycle
                    .create_container(
                        CreateContainerRequest { username, resources, image, ssh_keys, enable_docker, force },
                        RequestMode::Synchronous,
                    )
                    .await?;
                Ok(RpcResponse::Container(devbox))
            })
            .await
        }
        RpcRequest::GetContainer { token, username } => {
            handle(state, &token, username, |state, username| async move {
                let devbox = state
                    .lifecycle
                    .get_container(&username)
                    .await?
                    .ok_or_else(|| AppError::not_found(format!("no devbox for {username}")))?;
                Ok(RpcResponse::Container(devbox))
            })
            .await
        }
        RpcRequest::ListContainers { token } => match authenticate(state, &token) {
            Ok(_) => RpcResponse::Containers(state.lifecycle.list_containers().await),
            Err(err) => err.into(),
        },
        RpcRequest::StartContainer { token, username } => {
            handle(state, &token, username, |state, username| async move {
                state.lifecycle.start_container(&username).await?;
                Ok(RpcResponse::Empty)
            })
            .await
        }
        RpcRequest::StopContainer { token, username, force } => {
            handle(state, &token, username, |state, username| async move {
                state.lifecycle.stop_container(&username, force).await?;
                Ok(RpcResponse::Empty)
            })
            .await
        }
        RpcRequest::DeleteContainer { token, username } => {
            handle(state, &token, username, |state, username| async move {
                state.pipeline.delete_all_for_container(&container_name(&username)).await?;
                state.lifecycle.delete_container(&username, false).await?;
                Ok(RpcResponse::Empty)
            })
            .await
        }
        RpcRequest::ResizeContainer { token, username, resources, current_disk_usage_bytes, requested_disk_bytes } => {
            handle(state, &token, username, |state, username| async move {
                state
                    .lifecycle
                    .resize_container(&username, resources, current_disk_usage_bytes, requested_disk_bytes)
                    .await?;
                Ok(RpcResponse::Empty)
            })
            .await
        }
        RpcRequest::SetLabels { token, username, labels } => {
            handle(state, &token, username, |state, username| async move {
                let devbox = state.lifecycle.set_labels(&username, labels).await?;
                Ok(RpcResponse::Container(devbox))
            })
            .await
        }
        RpcRequest::RemoveLabel { token, username, key } => {
            handle(state, &token, username, |state, username| async move {
                let devbox = state.lifecycle.remove_label(&username, &key).await?;
                Ok(RpcResponse::Container(devbox))
            })
            .await
        }
        RpcRequest::GetMetrics { token, username } => {
            handle(state, &token, username, |state, username| async move {
                let snapshot = state.lifecycle.get_metrics(&username).await?;
                Ok(RpcResponse::Metrics(Metrics {
                    cpu_usage_pct: snapshot.cpu_usage_pct,
                    memory_used_bytes: snapshot.memory_used_bytes,
                    memory_limit_bytes: snapshot.memory_limit_bytes,
                    disk_used_bytes: snapshot.disk_used_bytes,
                }))
            })
            .await
        }
        RpcRequest::GetContainerACL { token, username } => {
            handle(state, &token, username, |state, username| async move {
                let name = container_name(&username);
                let acl = state
                    .acl_cache
                    .get(&name)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| AppError::not_found(format!("no ACL applied for {username}")))?;
                Ok(RpcResponse::Acl(acl))
            })
            .await
        }
        RpcRequest::UpdateContainerACL { token, username, preset, app_port, ingress_overrides, egress_overrides } => {
            handle(state, &token, username, |state, username| async move {
                let name = container_name(&username);
                let overrides = matches!(preset, devplane_types::models::AclPreset::Custom)
                    .then(|| (ingress_overrides, egress_overrides));
                let ctx = AclContext { proxy_source_ip: state.config.proxy_source_ip.clone(), app_port };
                let acl = state.acl_engine.apply(&name, preset, &ctx, overrides).await?;
                state.acl_cache.insert(name, acl.clone());
                Ok(RpcResponse::Acl(acl))
            })
            .await
        }
        RpcRequest::AddCollaborator { token, username, collaborator_username, ssh_public_key, has_sudo, has_container_runtime } => {
            handle(state, &token, username, move |state, username| {
                let identity_username = username.clone();
                async move {
                    let container_name = container_name(&username);
                    let account_name = Collaborator::account_name_for(&username, &collaborator_username);
                    state.hypervisor.create_user(&container_name, &["useradd".into(), "-m".into(), account_name.clone()]).await?;
                    state
                        .hypervisor
                        .exec(&container_name, &["mkdir".into(), "-p".into(), "-m".into(), "700".into(), format!("/home/{account_name}/.ssh")])
                        .await?;
                    state
                        .hypervisor
                        .write_file(&container_name, &format!("/home/{account_name}/.ssh/authorized_keys"), ssh_public_key.as_bytes(), 0o600)
                        .await?;
                    if has_sudo {
                        state.hypervisor.exec(&container_name, &["usermod".into(), "-aG".into(), "sudo".into(), account_name.clone()]).await?;
                    }
                    let collaborator = Collaborator {
                        container_name: container_name.clone(),
                        collaborator_username: collaborator_username.clone(),
                        owner_username: username,
                        account_name,
                        ssh_public_key,
                        has_sudo,
                        has_container_runtime,
                        created_at: chrono::Utc::now(),
                        created_by: identity_username,
                    };
                    state.collaborators.save(&collaborator).await?;
                    state.event_bus.publish(
                        devplane_types::models::ResourceType::Collaborator,
                        collaborator.collaborator_username.clone(),
                        devplane_types::models::EventKind::CollaboratorAdded,
                        serde_json::json!({"containerName": collaborator.container_name}),
                    );
                    Ok(RpcResponse::Collaborator(collaborator))
                }
            })
            .await
        }
        RpcRequest::ListCollaborators { token, username } => {
            handle(state, &token, username, |state, username| async move {
                let container_name = container_name(&username);
                let list = state.collaborators.list_by_container(&container_name).await?;
                Ok(RpcResponse::Collaborators(list))
            })
            .await
        }
        RpcRequest::RemoveCollaborator { token, username, collaborator_username } => {
            handle(state, &token, username, |state, username| async move {
                let container_name = container_name(&username);
                let existing = state.collaborators.get(&container_name, &collaborator_username).await?;
                let _ = state.hypervisor.exec(&container_name, &["userdel".into(), "-r".into(), existing.account_name.clone()]).await;
                state.collaborators.delete(&container_name, &collaborator_username).await?;
                state.event_bus.publish(
                    devplane_types::models::ResourceType::Collaborator,
                    collaborator_username,
                    devplane_types::models::EventKind::CollaboratorRemoved,
                    serde_json::json!({"containerName": container_name}),
                );
                Ok(RpcResponse::Empty)
            })
            .await
        }
        RpcRequest::AddRoute { token, full_domain, target_ip, target_port } => match authenticate(state, &token) {
            Ok(_) => match add_route(state, full_domain, target_ip, target_port).await {
                Ok(response) => response,
                Err(err) => err.into(),
            },
            Err(err) => err.into(),
        },
        RpcRequest::DeleteRoute { token, full_domain } => match authenticate(state, &token) {
            Ok(_) => match delete_route(state, full_domain).await {
                Ok(response) => response,
                Err(err) => err.into(),
            },
            Err(err) => err.into(),
        },
        RpcRequest::ListRoutes { token } => match authenticate(state, &token) {
            Ok(_) => match state.routes.list_http().await {
                Ok(routes) => RpcResponse::HttpRoutes(routes),
                Err(err) => err.into(),
            },
            Err(err) => err.into(),
        },
        RpcRequest::AddPassthroughRoute { token, external_port, protocol, target_ip, target_port } => {
            match authenticate(state, &token) {
                Ok(_) => match add_passthrough(state, external_port, protocol, target_ip, target_port).await {
                    Ok(response) => response,
                    Err(err) => err.into(),
                },
                Err(err) => err.into(),
            }
        }
        RpcRequest::DeletePassthroughRoute { token, external_port, protocol } => match authenticate(state, &token) {
            Ok(_) => match delete_passthrough(state, external_port, protocol).await {
                Ok(response) => response,
                Err(err) => err.into(),
            },
            Err(err) => err.into(),
        },
        RpcRequest::DeployApp {
            token,
            app_name,
            source_tarball,
            file_names,
            port,
            env_vars,
            desired_subdomain,
            generate_if_missing,
        } => match authenticate(state, &token) {
            Ok(identity) => {
                let request = DeployAppRequest {
                    username: identity.username.clone(),
                    app_name,
                    container_name: container_name(&identity.username),
                    source_tarball,
                    file_names,
                    port,
                    env_vars,
                    desired_subdomain,
                    base_domain: state.config.base_domain.clone(),
                    generate_if_missing,
                };
                state.pipeline.spawn_deploy(request);
                RpcResponse::Empty
            }
            Err(err) => err.into(),
        },
        RpcRequest::GetApp { token, username, name } => {
            handle(state, &token, username, |state, username| async move {
                Ok(RpcResponse::App(state.apps.get_by_username_name(&username, &name).await?))
            })
            .await
        }
        RpcRequest::ListApps { token } => match authenticate(state, &token) {
            Ok(identity) => {
                let result = if identity.is_admin() {
                    state.apps.list_all().await
                } else {
                    state.apps.list_by_owner(&identity.username).await
                };
                match result {
                    Ok(apps) => RpcResponse::Apps(apps),
                    Err(err) => err.into(),
                }
            }
            Err(err) => err.into(),
        },
        RpcRequest::StartApp { token, username, name } => {
            handle(state, &token, username, |state, username| async move {
                state.pipeline.start_app(&username, &name).await?;
                Ok(RpcResponse::Empty)
            })
            .await
        }
        RpcRequest::StopApp { token, username, name } => {
            handle(state, &token, username, |state, username| async move {
                state.pipeline.stop_app(&username, &name).await?;
                Ok(RpcResponse::Empty)
            })
            .await
        }
        RpcRequest::RestartApp { token, username, name } => {
            handle(state, &token, username, |state, username| async move {
                state.pipeline.restart_app(&username, &name).await?;
                Ok(RpcResponse::Empty)
            })
            .await
        }
        RpcRequest::DeleteApp { token, username, name, remove_data } => {
            handle(state, &token, username, |state, username| async move {
                state.pipeline.delete_app(&username, &name, remove_data).await?;
                Ok(RpcResponse::Empty)
            })
            .await
        }
    }
}

async fn add_route(state: &AppState, full_domain: String, target_ip: String, target_port: u16) -> AppResult<RpcResponse> {
    state.proxy.upsert_http_route(&full_domain, &target_ip, target_port).await?;
    let route = devplane_types::models::HttpRoute { full_domain: full_domain.clone(), target_ip, target_port, active: true };
    state.routes.save_http(&route).await?;
    state.event_bus.publish(
        devplane_types::models::ResourceType::Route,
        route.full_domain.clone(),
        devplane_types::models::EventKind::RouteAdded,
        serde_json::json!({}),
    );
    Ok(RpcResponse::HttpRoute(route))
}

async fn delete_route(state: &AppState, full_domain: String) -> AppResult<RpcResponse> {
    state.proxy.delete_http_route(&full_domain).await?;
    state.routes.delete_http(&full_domain).await?;
    state.event_bus.publish(
        devplane_types::models::ResourceType::Route,
        full_domain,
        devplane_types::models::EventKind::RouteDeleted,
        serde_json::json!({}),
    );
    Ok(RpcResponse::Empty)
}

async fn add_passthrough(
    state: &AppState,
    external_port: u16,
    protocol: devplane_types::models::Protocol,
    target_ip: String,
    target_port: u16,
) -> AppResult<RpcResponse> {
    state.proxy.upsert_passthrough(external_port, protocol, &target_ip, target_port).await?;
    let route = devplane_types::models::PassthroughRoute { external_port, protocol, target_ip, target_port };
    state.routes.save_passthrough(&route).await?;
    Ok(RpcResponse::PassthroughRoute(route))
}

async fn delete_passthrough(state: &AppState, external_port: u16, protocol: devplane_types::models::Protocol) -> AppResult<RpcResponse> {
    state.proxy.delete_passthrough(external_port, protocol).await?;
    state.routes.delete_passthrough(external_port, protocol).await?;
    Ok(RpcResponse::Empty)
}

fn authenticate(state: &AppState, token: &str) -> AppResult<devplane_types::models::Identity> {
    Ok(state.token_authenticator.validate_token(token)?.identity)
}

/// Verifies the token, checks the caller may act as `username`, then runs
/// `op` with an owned clone of the state and the username it validated.
/// Collapses the "authenticate, authorize, call" sequence every
/// ownership-scoped RPC method repeats.
async fn handle<F, Fut>(state: &AppState, token: &str, username: String, op: F) -> RpcResponse
where
    F: FnOnce(AppState, String) -> Fut,
    Fut: std::future::Future<Output = AppResult<RpcResponse>>,
{
    let identity = match authenticate(state, token) {
        Ok(identity) => identity,
        Err(err) => return err.into(),
    };
    if !identity.can_act_as(&username) {
        return AppError::permission_denied("cannot act on another user's resources").into();
    }
    match op(state.clone(), username).await {
        Ok(response) => response,
        Err(err) => err.into(),
    }
}
