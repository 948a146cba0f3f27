//! Middleware stack, applied outermost-first exactly as this codebase's
//! `router.rs` layers its own: panic-recovery and structured logging come
//! from `tower_http`'s `TraceLayer` at the router level; what lives here
//! is authentication (reject unless the handler is on the public
//! allow-list) and authorization (role check for admin-only ops).

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use devplane_types::models::Identity;

use crate::state::AppState;

/// Paths reachable without a bearer token: liveness/readiness and the
/// RPC method that issues tokens in the first place.
fn is_public(path: &str) -> bool {
    matches!(path, "/healthz" | "/health" | "/v1/ping" | "/v1/system/ping")
}

fn extract_token<'a>(request: &'a Request) -> Option<&'a str> {
    request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .or_else(|| request.uri().query().and_then(|q| query_param(q, "token")))
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then_some(v)
    })
}

/// Verifies the bearer token (header or `?token=` for stream upgrades)
/// and inserts the resolved [`Identity`] into the request extensions for
/// downstream extractors.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path().to_string();
    if is_public(&path) {
        return Ok(next.run(request).await);
    }

    let Some(token) = extract_token(&request) else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    match state.token_authenticator.validate_token(token) {
        Ok(verified) => {
            request.extensions_mut().insert(verified.identity);
            Ok(next.run(request).await)
        }
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Admin-only routes (container/app lifecycle on another user's
/// resources, ACL edits) require the `admin` role; everything else is
/// left to per-handler ownership checks against the authenticated
/// `Identity`.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, StatusCode> {
    let identity = request.extensions().get::<Identity>().cloned();
    match identity {
        Some(identity) if identity.has_role("admin") => Ok(next.run(request).await),
        Some(_) => Err(StatusCode::FORBIDDEN),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}
