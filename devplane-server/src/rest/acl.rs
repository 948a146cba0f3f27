//! `GetContainerACL`/`UpdateContainerACL`. The engine itself only
//! expands-and-installs; the currently-applied ACL per container is
//! tracked here in a small `DashMap`, the same ephemeral-cache shape this
//! codebase uses for its OAuth state table.

use axum::extract::{Extension, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use devplane_core::acl::AclContext;
use devplane_types::models::{AclPreset, AclRule, Identity};
use devplane_types::AppError;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_acl(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot view another user's ACL").into());
    }
    let name = devplane_core::lifecycle::container_name(&username);
    let acl = state
        .acl_cache
        .get(&name)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::not_found(format!("no ACL applied for {username}")))?;
    Ok(Json(acl))
}

#[derive(Deserialize)]
pub struct UpdateAclBody {
    pub preset: AclPreset,
    pub app_port: Option<u16>,
    #[serde(default)]
    pub ingress_overrides: Vec<AclRule>,
    #[serde(default)]
    pub egress_overrides: Vec<AclRule>,
}

pub async fn update_acl(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(username): Path<String>,
    Json(body): Json<UpdateAclBody>,
) -> Result<impl IntoResponse, ApiError> {
    if !identity.can_act_as(&username) {
        return Err(AppError::permission_denied("cannot update another user's ACL").into());
    }
    let name = devplane_core::lifecycle::container_name(&username);
    let overrides = matches!(body.preset, AclPreset::Custom)
        .then(|| (body.ingress_overrides.clone(), body.egress_overrides.clone()));
    let ctx = AclContext { proxy_source_ip: state.config.proxy_source_ip.clone(), app_port: body.app_port };
    let acl = state.acl_engine.apply(&name, body.preset, &ctx, overrides).await?;
    state.acl_cache.insert(name, acl.clone());
    Ok(Json(acl))
}

#[cfg(test)]
mod tests {
    use axum_test::TestServer;
    use serde_json::json;

    use crate::test_support::{bearer_token, test_state};

    #[tokio::test]
    async fn update_then_get_round_trips_the_applied_preset() {
        let state = test_state();
        let token = bearer_token(&state, "carol", &[]);
        let server = TestServer::new(crate::rest::router(state)).unwrap();

        let update = server
            .put("/v1/containers/carol/acl")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&format!("Bearer {token}")).unwrap())
            .json(&json!({"preset": "HTTP_ONLY"}))
            .await;
        update.assert_status_ok();
        let body: serde_json::Value = update.json();
        assert_eq!(body["preset"], json!("HTTP_ONLY"));

        let fetched = server
            .get("/v1/containers/carol/acl")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&format!("Bearer {token}")).unwrap())
            .await;
        fetched.assert_status_ok();
        let fetched_body: serde_json::Value = fetched.json();
        assert_eq!(fetched_body, body);
    }

    #[tokio::test]
    async fn cannot_view_another_users_acl_without_admin_role() {
        let state = test_state();
        let token = bearer_token(&state, "mallory", &[]);
        let server = TestServer::new(crate::rest::router(state)).unwrap();

        server
            .get("/v1/containers/carol/acl")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&format!("Bearer {token}")).unwrap())
            .await
            .assert_status(axum::http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn get_acl_before_any_update_is_not_found() {
        let state = test_state();
        let token = bearer_token(&state, "dave", &[]);
        let server = TestServer::new(crate::rest::router(state)).unwrap();

        server
            .get("/v1/containers/dave/acl")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&format!("Bearer {token}")).unwrap())
            .await
            .assert_status(axum::http::StatusCode::NOT_FOUND);
    }
}
