//! `AddCollaborator`/`ListCollaborators`/`RemoveCollaborator`. Not a
//! distinct engine component in its own right — business logic (name
//! collision, provisioning the in-DevBox account) lives directly in
//! these handlers, over the `CollaboratorsRepository` plus a hypervisor
//! call to create the account.

use axum::extract::{Extension, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use devplane_types::models::{Collaborator, EventKind, Identity, ResourceType};
use devplane_types::AppError;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AddCollaboratorBody {
    pub collaborator_username: String,
    pub ssh_public_key: String,
    #[serde(default)]
    pub has_sudo: bool,
    #[serde(default)]
    pub has_container_runtime: bool,
}

pub async fn add(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(username): Path<String>,
    Json(body): Json<AddCollaboratorBody>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot add collaborators to another user's container").into());
    }
    let container_name = devplane_core::lifecycle::container_name(&username);
    let account_name = Collaborator::account_name_for(&username, &body.collaborator_username);

    state
        .hypervisor
        .create_user(
            &container_name,
            &["useradd".into(), "-m".into(), account_name.clone()],
        )
        .await?;
    state
        .hypervisor
        .exec(
            &container_name,
            &["mkdir".into(), "-p".into(), "-m".into(), "700".into(), format!("/home/{account_name}/.ssh")],
        )
        .await?;
    state
        .hypervisor
        .write_file(
            &container_name,
            &format!("/home/{account_name}/.ssh/authorized_keys"),
            body.ssh_public_key.as_bytes(),
            0o600,
        )
        .await?;
    if body.has_sudo {
        state
            .hypervisor
            .exec(&container_name, &["usermod".into(), "-aG".into(), "sudo".into(), account_name.clone()])
            .await?;
    }

    let collaborator = Collaborator {
        container_name: container_name.clone(),
        collaborator_username: body.collaborator_username.clone(),
        owner_username: username,
        account_name,
        ssh_public_key: body.ssh_public_key,
        has_sudo: body.has_sudo,
        has_container_runtime: body.has_container_runtime,
        created_at: chrono::Utc::now(),
        created_by: identity.username.clone(),
    };
    state.collaborators.save(&collaborator).await?;
    state.event_bus.publish(
        ResourceType::Collaborator,
        collaborator.collaborator_username.clone(),
        EventKind::CollaboratorAdded,
        serde_json::json!({"containerName": collaborator.container_name}),
    );
    Ok(Json(collaborator))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot list another user's collaborators").into());
    }
    let container_name = devplane_core::lifecycle::container_name(&username);
    let list = state.collaborators.list_by_container(&container_name).await?;
    Ok(Json(list))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((username, collaborator)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot remove another user's collaborator").into());
    }
    let container_name = devplane_core::lifecycle::container_name(&username);
    let existing = state.collaborators.get(&container_name, &collaborator).await?;
    state
        .hypervisor
        .exec(&container_name, &["userdel".into(), "-r".into(), existing.account_name.clone()])
        .await
        .ok();
    state.collaborators.delete(&container_name, &collaborator).await?;
    state.event_bus.publish(
        ResourceType::Collaborator,
        collaborator,
        EventKind::CollaboratorRemoved,
        serde_json::json!({"containerName": container_name}),
    );
    Ok(axum::http::StatusCode::NO_CONTENT)
}
