//! C3 — Persistence Layer.
//!
//! Three typed repositories (`Apps`, `Collaborators`, `Routes`) over a
//! relational store, each with CRUD plus filtered listings.
//! Writes are idempotent (upsert by primary key); uniqueness violations
//! surface as `ALREADY_EXISTS`, row-absence as `NOT_FOUND`.
//!
//! Every repository trait also has an in-memory implementation
//! (`memory::*`) used by unit tests in this crate and integration tests
//! upstream — the relational store is treated as an opaque durable map
//!, so a `HashMap` behind the same trait is a faithful stand-in.

pub mod apps;
pub mod audit;
pub mod collaborators;
pub mod routes;

pub use apps::{AppsRepository, PgAppsRepository};
pub use audit::{AuditLog, PgAuditLog};
pub use collaborators::{CollaboratorsRepository, PgCollaboratorsRepository};
pub use routes::{PgRoutesRepository, RoutesRepository};

/// Additive-only schema migrations, run at startup. New columns
/// are nullable with defaults; there is never a destructive migration in
/// this set. Delegates to `sqlx::migrate!`, which tracks applied versions
/// in its own `_sqlx_migrations` table.
pub async fn run_migrations(pool: &sqlx::PgPool) -> devplane_types::AppResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| devplane_types::AppError::internal(format!("running migrations: {e}")))
}
