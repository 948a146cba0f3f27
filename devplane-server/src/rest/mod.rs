//! REST/JSON gateway. Router layering mirrors this codebase's own
//! `router.rs`: public routes (health, ping) merged with a protected
//! router wrapped in `authenticate` (and `require_admin` for the
//! admin-only subtree), `TraceLayer` and CORS outermost.

mod acl;
mod apps;
mod collaborators;
mod containers;
mod events;
mod routes;
mod shell;
mod system;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{middleware as axum_middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::middleware::{authenticate, require_admin};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/healthz", get(system::healthz))
        .route("/v1/ping", get(system::ping));

    let protected = Router::new()
        .route("/v1/containers", post(containers::create).get(containers::list))
        .route(
            "/v1/containers/:username",
            get(containers::get).delete(containers::delete),
        )
        .route("/v1/containers/:username/start", post(containers::start))
        .route("/v1/containers/:username/stop", post(containers::stop))
        .route("/v1/containers/:username/resize", post(containers::resize))
        .route("/v1/containers/:username/labels", put(containers::set_labels))
        .route(
            "/v1/containers/:username/labels/:key",
            delete(containers::remove_label),
        )
        .route("/v1/containers/:username/metrics", get(containers::metrics))
        .route(
            "/v1/containers/:username/acl",
            get(acl::get_acl).put(acl::update_acl),
        )
        .route("/v1/containers/:username/collaborators", post(collaborators::add).get(collaborators::list))
        .route(
            "/v1/containers/:username/collaborators/:collaborator",
            delete(collaborators::remove),
        )
        .route("/v1/containers/:username/shell", get(shell::attach))
        .route("/v1/apps", post(apps::deploy).get(apps::list))
        .route("/v1/apps/:username/:name", get(apps::get).delete(apps::delete))
        .route("/v1/apps/:username/:name/start", post(apps::start))
        .route("/v1/apps/:username/:name/stop", post(apps::stop))
        .route("/v1/apps/:username/:name/restart", post(apps::restart))
        .route("/v1/apps/:username/:name/logs", get(apps::logs))
        .route("/v1/routes", post(routes::add_http).get(routes::list_http))
        .route("/v1/routes/:domain", delete(routes::delete_http))
        .route("/v1/routes/passthrough", post(routes::add_passthrough).get(routes::list_passthrough))
        .route("/v1/routes/passthrough/:port/:protocol", delete(routes::delete_passthrough))
        .route("/v1/events/subscribe", get(events::subscribe))
        .route("/v1/system/info", get(system::info))
        .layer(axum_middleware::from_fn_with_state(state.clone(), authenticate));

    let internal = Router::new()
        .route("/certs", get(system::certs))
        .layer(axum_middleware::from_fn(require_admin))
        .layer(axum_middleware::from_fn_with_state(state.clone(), authenticate));

    public
        .merge(protected)
        .merge(internal)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

/// Integration tests for the gateway's routing and middleware stack using
/// axum-test, built against a real router over an in-memory `AppState`.
#[cfg(test)]
mod tests {
    use axum_test::TestServer;
    use serde_json::json;

    use crate::test_support::{bearer_token, test_state};

    #[tokio::test]
    async fn healthz_and_ping_require_no_token() {
        let server = TestServer::new(super::router(test_state())).unwrap();

        server.get("/healthz").await.assert_status_ok();
        server.get("/v1/ping").await.assert_status_ok();
    }

    #[tokio::test]
    async fn protected_route_without_token_is_unauthorized() {
        let server = TestServer::new(super::router(test_state())).unwrap();
        server.get("/v1/system/info").await.assert_status(axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_route_with_bad_token_is_unauthorized() {
        let state = test_state();
        let server = TestServer::new(super::router(state)).unwrap();
        server
            .get("/v1/system/info")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_static("Bearer not-a-real-token"))
            .await
            .assert_status(axum::http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_route_with_valid_token_succeeds() {
        let state = test_state();
        let token = bearer_token(&state, "bob", &[]);
        let server = TestServer::new(super::router(state)).unwrap();

        let response = server
            .get("/v1/system/info")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&format!("Bearer {token}")).unwrap())
            .await;

        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["network_cidr"], json!("10.0.0.0/16"));
    }

    #[tokio::test]
    async fn internal_certs_endpoint_requires_admin_role() {
        let state = test_state();
        let member_token = bearer_token(&state, "bob", &[]);
        let admin_token = bearer_token(&state, "root", &["admin"]);
        let server = TestServer::new(super::router(state)).unwrap();

        server
            .get("/certs")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&format!("Bearer {member_token}")).unwrap())
            .await
            .assert_status(axum::http::StatusCode::FORBIDDEN);

        server
            .get("/certs")
            .add_header(axum::http::header::AUTHORIZATION, axum::http::HeaderValue::from_str(&format!("Bearer {admin_token}")).unwrap())
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn unknown_path_falls_back_to_404() {
        let server = TestServer::new(super::router(test_state())).unwrap();
        server.get("/v1/does-not-exist").await.assert_status(axum::http::StatusCode::NOT_FOUND);
    }
}
