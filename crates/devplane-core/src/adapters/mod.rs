//! External-system adapters: the hypervisor, the DNS
//! provider, and the reverse proxy. Each is a plug-in surface expressed as
//! an `async_trait` rather than an inheritance hierarchy, with one
//! concrete implementation in this workspace so it compiles and is testable
//! end-to-end; the real engines behind them are out of scope.

pub mod dns;
pub mod hypervisor;
pub mod proxy;

use std::future::Future;
use std::time::Duration;

use devplane_types::{AppError, AppResult, ErrorKind};
use tracing::warn;

/// Maximum retry attempts for transient adapter errors.
pub const MAX_RETRIES: u32 = 5;

/// Runs `operation` with exponential backoff on `UNAVAILABLE` errors, up to
/// `MAX_RETRIES` attempts. Any other error kind (auth/validation) is
/// non-retryable and returned immediately — retrying a malformed request
/// never helps it succeed.
pub async fn with_retry<T, F, Fut>(label: &str, mut operation: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.kind == ErrorKind::Unavailable && attempt < MAX_RETRIES => {
                attempt += 1;
                let backoff = Duration::from_millis(200 * 2u64.pow(attempt.min(6)));
                warn!(label, attempt, backoff_ms = backoff.as_millis() as u64, "retrying transient adapter error");
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Shells out to an external CLI and classifies the result: non-zero exit
/// with a message matching common auth/validation phrasing is non-retryable
/// `INVALID_ARGUMENT`/`PERMISSION_DENIED`; anything else is `UNAVAILABLE`
/// so `with_retry` will attempt it again.
pub(crate) fn classify_process_failure(stderr: &str) -> AppError {
    let lower = stderr.to_lowercase();
    if lower.contains("permission denied") || lower.contains("not authorized") {
        AppError::permission_denied(stderr.to_string())
    } else if lower.contains("not found") || lower.contains("no such") {
        AppError::not_found(stderr.to_string())
    } else if lower.contains("invalid") || lower.contains("usage:") {
        AppError::invalid_argument(stderr.to_string())
    } else {
        AppError::unavailable(stderr.to_string())
    }
}
