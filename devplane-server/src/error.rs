//! Maps the crate-wide [`AppError`] onto an HTTP response: the status
//! code comes from `ErrorKind::http_status()`, the body is the error's
//! own `{error, code, correlationId}` serialization. `Internal` errors are
//! logged at `error` level (with the correlation id) before the body
//! strips anything sensitive; every other kind logs at `warn`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use devplane_types::{AppError, ErrorKind};

pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match self.0.kind {
            ErrorKind::Internal => {
                tracing::error!(
                    correlation_id = ?self.0.correlation_id,
                    error = %self.0.message,
                    source = ?self.0.source,
                    "internal error"
                );
            }
            _ => tracing::warn!(code = self.0.kind.code(), error = %self.0.message, "request failed"),
        }
        (status, Json(self.0)).into_response()
    }
}
