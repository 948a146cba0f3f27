//! `DeployApp` (multipart upload) plus `ListApps`/`GetApp`/`StopApp`/
//! `StartApp`/`RestartApp`/`DeleteApp`/`GetAppLogs`.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::extract::{Extension, Multipart, Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::{self, Stream};
use serde::Deserialize;

use devplane_core::lifecycle::container_name;
use devplane_core::pipeline::DeployAppRequest;
use devplane_types::models::Identity;
use devplane_types::AppError;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn deploy(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut app_name = None;
    let mut port: u16 = 8080;
    let mut desired_subdomain = None;
    let mut generate_if_missing = true;
    let mut env_vars = HashMap::new();
    let mut source_tarball = Vec::new();
    let mut file_names = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::invalid_argument(e.to_string()))? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "appName" => app_name = Some(text_field(field).await?),
            "port" => port = text_field(field).await?.parse().unwrap_or(8080),
            "subdomain" => desired_subdomain = Some(text_field(field).await?),
            "generateIfMissing" => generate_if_missing = text_field(field).await?.parse().unwrap_or(true),
            "envVars" => {
                let raw = text_field(field).await?;
                env_vars = serde_json::from_str(&raw).unwrap_or_default();
            }
            "fileNames" => {
                let raw = text_field(field).await?;
                file_names = serde_json::from_str(&raw).unwrap_or_default();
            }
            "source" => {
                source_tarball = field.bytes().await.map_err(|e| AppError::invalid_argument(e.to_string()))?.to_vec();
            }
            _ => {}
        }
    }

    let app_name = app_name.ok_or_else(|| AppError::invalid_argument("missing appName field"))?;
    if source_tarball.is_empty() {
        return Err(AppError::invalid_argument("missing source tarball").into());
    }

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
    Ok(axum::http::StatusCode::ACCEPTED)
}

async fn text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field.text().await.map_err(|e| AppError::invalid_argument(e.to_string()).into())
}

pub async fn list(State(state): State<AppState>, Extension(identity): Extension<Identity>) -> Result<impl IntoResponse, ApiError> {
    let apps = if identity.is_admin() {
        state.apps.list_all().await?
    } else {
        state.apps.list_by_owner(&identity.username).await?
    };
    Ok(Json(apps))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((username, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot view another user's app").into());
    }
    Ok(Json(state.apps.get_by_username_name(&username, &name).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((username, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot delete another user's app").into());
    }
    state.pipeline.delete_app(&username, &name, true).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn start(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((username, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot start another user's app").into());
    }
    state.pipeline.start_app(&username, &name).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn stop(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((username, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot stop another user's app").into());
    }
    state.pipeline.stop_app(&username, &name).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn restart(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((username, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot restart another user's app").into());
    }
    state.pipeline.restart_app(&username, &name).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(rename = "tailLines", default = "default_tail_lines")]
    tail_lines: u32,
}

fn default_tail_lines() -> u32 {
    200
}

pub async fn logs(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((username, name)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot view another user's app logs").into());
    }
    let app = state.apps.get_by_username_name(&username, &name).await?;
    let result = state
        .hypervisor
        .exec(
            &app.container_name,
            &["docker".into(), "logs".into(), "--tail".into(), query.tail_lines.to_string(), app.name.clone()],
        )
        .await?;
    let text = String::from_utf8_lossy(&result.stdout).into_owned();
    let events: Vec<_> = text
        .lines()
        .map(|line| Ok(SseEvent::default().event("log").data(line.to_string())))
        .collect();
    Ok(Sse::new(stream::iter(events)).keep_alive(KeepAlive::default()))
}
