//! `CreateContainer`/`ListContainers`/`GetContainer`/`DeleteContainer`/
//! `StartContainer`/`StopContainer`/`ResizeContainer`/`SetLabels`/
//! `RemoveLabel`/`GetMetrics`.

use std::collections::HashMap;

use axum::extract::{Extension, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use devplane_core::lifecycle::{CreateContainerRequest, RequestMode};
use devplane_types::models::{DevboxResources, Identity};
use devplane_types::AppError;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateContainerBody {
    pub username: String,
    pub resources: DevboxResources,
    pub image: String,
    #[serde(default)]
    pub ssh_keys: Vec<String>,
    #[serde(default)]
    pub enable_docker: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub r#async: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<CreateContainerBody>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&body.username) {
        return Err(AppError::permission_denied("cannot create a container for another user").into());
    }
    let mode = if body.r#async { RequestMode::Asynchronous } else { RequestMode::Synchronous };
    let devbox = state
        .lifecycle
        .create_container(
            CreateContainerRequest {
                username: body.username,
                resources: body.resources,
                image: body.image,
                ssh_keys: body.ssh_keys,
                enable_docker: body.enable_docker,
                force: body.force,
            },
            mode,
        )
        .await?;
    Ok(Json(devbox))
}

pub async fn list(State(state): State<AppState>, Extension(identity): Extension<Identity>) -> impl IntoResponse {
    let all = state.lifecycle.list_containers().await;
    let visible: Vec<_> = all.into_iter().filter(|d| identity.can_act_as(&d.username)).collect();
    Json(visible)
}

pub async fn get(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot view another user's container").into());
    }
    let devbox = state
        .lifecycle
        .get_container(&username)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no devbox for {username}")))?;
    Ok(Json(devbox))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot delete another user's container").into());
    }
    state.pipeline.delete_all_for_container(&devplane_core::lifecycle::container_name(&username)).await?;
    state.lifecycle.delete_container(&username, false).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn start(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot start another user's container").into());
    }
    state.lifecycle.start_container(&username).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct StopBody {
    #[serde(default)]
    pub force: bool,
}

pub async fn stop(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(username): Path<String>,
    body: Option<Json<StopBody>>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot stop another user's container").into());
    }
    let force = body.map(|b| b.0.force).unwrap_or(false);
    state.lifecycle.stop_container(&username, force).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ResizeBody {
    pub resources: DevboxResources,
    pub current_disk_usage_bytes: Option<u64>,
    pub requested_disk_bytes: Option<u64>,
}

#[derive(Serialize)]
pub struct ResizeResponse {
    pub ok: bool,
}

pub async fn resize(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(username): Path<String>,
    Json(body): Json<ResizeBody>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot resize another user's container").into());
    }
    state
        .lifecycle
        .resize_container(&username, body.resources, body.current_disk_usage_bytes, body.requested_disk_bytes)
        .await?;
    Ok(Json(ResizeResponse { ok: true }))
}

pub async fn set_labels(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(username): Path<String>,
    Json(labels): Json<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot set labels on another user's container").into());
    }
    let devbox = state.lifecycle.set_labels(&username, labels).await?;
    Ok(Json(devbox))
}

pub async fn remove_label(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((username, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot remove a label from another user's container").into());
    }
    let devbox = state.lifecycle.remove_label(&username, &key).await?;
    Ok(Json(devbox))
}

pub async fn metrics(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot view another user's container metrics").into());
    }
    let snapshot = state.lifecycle.get_metrics(&username).await?;
    Ok(Json(MetricsResponse {
        cpu_usage_pct: snapshot.cpu_usage_pct,
        memory_used_bytes: snapshot.memory_used_bytes,
        memory_limit_bytes: snapshot.memory_limit_bytes,
        disk_used_bytes: snapshot.disk_used_bytes,
    }))
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub cpu_usage_pct: f64,
    pub memory_used_bytes: u64,
    pub memory_limit_bytes: u64,
    pub disk_used_bytes: u64,
}
