//! `AddRoute`/`DeleteRoute`/`ListRoutes`/`AddPassthroughRoute`/
//! `DeletePassthroughRoute`. Thin wrappers over the proxy adapter plus
//! the routes repository — kept in sync in that order (proxy first, so a
//! record is never persisted for a route the proxy rejected).

use axum::extract::{Extension, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use devplane_types::models::{EventKind, HttpRoute, Identity, PassthroughRoute, Protocol, ResourceType};
use devplane_types::AppError;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AddHttpRouteBody {
    pub full_domain: String,
    pub target_ip: String,
    pub target_port: u16,
}

pub async fn add_http(
    State(state): State<AppState>,
    Extension(_identity): Extension<Identity>,
    Json(body): Json<AddHttpRouteBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.proxy.upsert_http_route(&body.full_domain, &body.target_ip, body.target_port).await?;
    let route =
        HttpRoute { full_domain: body.full_domain.clone(), target_ip: body.target_ip, target_port: body.target_port, active: true };
    state.routes.save_http(&route).await?;
    state.event_bus.publish(ResourceType::Route, route.full_domain.clone(), EventKind::RouteAdded, serde_json::json!({}));
    Ok(Json(route))
}

pub async fn list_http(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.routes.list_http().await?))
}

pub async fn delete_http(
    State(state): State<AppState>,
    Extension(_identity): Extension<Identity>,
    Path(domain): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.proxy.delete_http_route(&domain).await?;
    state.routes.delete_http(&domain).await?;
    state.event_bus.publish(ResourceType::Route, domain, EventKind::RouteDeleted, serde_json::json!({}));
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct AddPassthroughBody {
    pub external_port: u16,
    pub protocol: Protocol,
    pub target_ip: String,
    pub target_port: u16,
}

pub async fn add_passthrough(
    State(state): State<AppState>,
    Extension(_identity): Extension<Identity>,
    Json(body): Json<AddPassthroughBody>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .proxy
        .upsert_passthrough(body.external_port, body.protocol, &body.target_ip, body.target_port)
        .await?;
    let route = PassthroughRoute {
        external_port: body.external_port,
        protocol: body.protocol,
        target_ip: body.target_ip,
        target_port: body.target_port,
    };
    state.routes.save_passthrough(&route).await?;
    Ok(Json(route))
}

pub async fn list_passthrough(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.routes.list_passthrough().await?))
}

pub async fn delete_passthrough(
    State(state): State<AppState>,
    Extension(_identity): Extension<Identity>,
    Path((port, protocol)): Path<(u16, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let protocol = match protocol.to_ascii_lowercase().as_str() {
        "tcp" => Protocol::Tcp,
        "udp" => Protocol::Udp,
        other => return Err(AppError::invalid_argument(format!("unknown protocol: {other}")).into()),
    };
    state.proxy.delete_passthrough(port, protocol).await?;
    state.routes.delete_passthrough(port, protocol).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum_test::TestServer;
    use serde_json::json;

    use crate::test_support::{bearer_token, test_state};

    #[tokio::test]
    async fn add_list_delete_http_route_round_trips() {
        let state = test_state();
        let token = bearer_token(&state, "bob", &[]);
        let server = TestServer::new(crate::rest::router(state)).unwrap();
        let auth = format!("Bearer {token}");

        server
            .post("/v1/routes")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&auth).unwrap())
            .json(&json!({"full_domain": "bob-web.apps.example.com", "target_ip": "10.0.0.2", "target_port": 8080}))
            .await
            .assert_status_ok();

        let listed = server
            .get("/v1/routes")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&auth).unwrap())
            .await;
        listed.assert_status_ok();
        let routes: Vec<serde_json::Value> = listed.json();
        assert!(routes.iter().any(|r| r["full_domain"] == json!("bob-web.apps.example.com")));

        server
            .delete("/v1/routes/bob-web.apps.example.com")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&auth).unwrap())
            .await
            .assert_status(axum::http::StatusCode::NO_CONTENT);

        let after_delete = server
            .get("/v1/routes")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&auth).unwrap())
            .await;
        let routes: Vec<serde_json::Value> = after_delete.json();
        assert!(!routes.iter().any(|r| r["full_domain"] == json!("bob-web.apps.example.com")));
    }

    #[tokio::test]
    async fn add_list_delete_passthrough_route_round_trips() {
        let state = test_state();
        let token = bearer_token(&state, "bob", &[]);
        let server = TestServer::new(crate::rest::router(state)).unwrap();
        let auth = format!("Bearer {token}");

        server
            .post("/v1/routes/passthrough")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&auth).unwrap())
            .json(&json!({"external_port": 2200, "protocol": "tcp", "target_ip": "10.0.0.2", "target_port": 22}))
            .await
            .assert_status_ok();

        let listed = server
            .get("/v1/routes/passthrough")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&auth).unwrap())
            .await;
        let routes: Vec<serde_json::Value> = listed.json();
        assert!(routes.iter().any(|r| r["external_port"] == json!(2200)));

        server
            .delete("/v1/routes/passthrough/2200/tcp")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&auth).unwrap())
            .await
            .assert_status(axum::http::StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn delete_passthrough_with_unknown_protocol_is_invalid_argument() {
        let state = test_state();
        let token = bearer_token(&state, "bob", &[]);
        let server = TestServer::new(crate::rest::router(state)).unwrap();

        server
            .delete("/v1/routes/passthrough/2200/sctp")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&format!("Bearer {token}")).unwrap())
            .await
            .assert_status_bad_request();
    }
}
