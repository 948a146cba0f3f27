//! Apps repository: stored as an opaque JSON blob keyed by `id`, alongside
//! denormalized columns (`username`, `name`, `state`, `subdomain`, `port`,
//! `container_name`) used for indexing.

use async_trait::async_trait;
use devplane_types::models::{App, AppState};
use devplane_types::{AppError, AppResult};
use sqlx::Row;

#[async_trait]
pub trait AppsRepository: Send + Sync {
    /// Upsert by primary key (`id`); the subdomain/`(username, name)`
    /// uniqueness constraints surface as `ALREADY_EXISTS` on first insert.
    async fn save(&self, app: &App) -> AppResult<()>;
    async fn get_by_id(&self, id: uuid::Uuid) -> AppResult<App>;
    async fn get_by_username_name(&self, username: &str, name: &str) -> AppResult<App>;
    async fn get_by_subdomain(&self, subdomain: &str) -> AppResult<Option<App>>;
    async fn list_by_owner(&self, username: &str) -> AppResult<Vec<App>>;
    async fn list_by_state(&self, state: AppState) -> AppResult<Vec<App>>;
    async fn list_all(&self) -> AppResult<Vec<App>>;
    async fn delete(&self, id: uuid::Uuid) -> AppResult<()>;
}

pub struct PgAppsRepository {
    pool: sqlx::PgPool,
}

impl PgAppsRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_app(row: sqlx::postgres::PgRow) -> AppResult<App> {
    let data: serde_json::Value = row.try_get("data").map_err(map_sqlx_err)?;
    serde_json::from_value(data).map_err(|e| AppError::internal(format!("deserializing app row: {e}")))
}

/// Boundary-classification helper, mirroring this codebase's
/// `map_sqlx_err` convention: every sqlx error is classified into the
/// shared taxonomy exactly once, here, not re-inspected upstream.
fn map_sqlx_err(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::RowNotFound => AppError::not_found("app not found"),
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::already_exists(format!("app already exists: {db_err}"))
        }
        other => AppError::unavailable(format!("database error: {other}")),
    }
}

#[async_trait]
impl AppsRepository for PgAppsRepository {
    async fn save(&self, app: &App) -> AppResult<()> {
        let data = serde_json::to_value(app).map_err(|e| AppError::internal(format!("serializing app: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO apps (id, data, username, name, state, subdomain, port, container_name, created_at, updated_at, deployed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                data = EXCLUDED.data,
                state = EXCLUDED.state,
                subdomain = EXCLUDED.subdomain,
                port = EXCLUDED.port,
                container_name = EXCLUDED.container_name,
                updated_at = EXCLUDED.updated_at,
                deployed_at = EXCLUDED.deployed_at
            "#,
        )
        .bind(app.id)
        .bind(&data)
        .bind(&app.username)
        .bind(&app.name)
        .bind(serde_json::to_string(&app.state).unwrap_or_default().trim_matches('"'))
        .bind(&app.subdomain)
        .bind(app.port as i32)
        .bind(&app.container_name)
        .bind(app.created_at)
        .bind(app.updated_at)
        .bind(app.deployed_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn get_by_id(&self, id: uuid::Uuid) -> AppResult<App> {
        let row = sqlx::query("SELECT data FROM apps WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| AppError::not_found(format!("app {id} not found")))?;
        row_to_app(row)
    }

    async fn get_by_username_name(&self, username: &str, name: &str) -> AppResult<App> {
        let row = sqlx::query("SELECT data FROM apps WHERE username = $1 AND name = $2")
            .bind(username)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| AppError::not_found(format!("app {username}/{name} not found")))?;
        row_to_app(row)
    }

    async fn get_by_subdomain(&self, subdomain: &str) -> AppResult<Option<App>> {
        let row = sqlx::query("SELECT data FROM apps WHERE subdomain = $1")
            .bind(subdomain)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(row_to_app).transpose()
    }

    async fn list_by_owner(&self, username: &str) -> AppResult<Vec<App>> {
        let rows = sqlx::query("SELECT data FROM apps WHERE username = $1")
            .bind(username)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.into_iter().map(row_to_app).collect()
    }

    async fn list_by_state(&self, state: AppState) -> AppResult<Vec<App>> {
        let state_str = serde_json::to_string(&state).unwrap_or_default();
        let state_str = state_str.trim_matches('"');
        let rows = sqlx::query("SELECT data FROM apps WHERE state = $1")
            .bind(state_str)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.into_iter().map(row_to_app).collect()
    }

    async fn list_all(&self) -> AppResult<Vec<App>> {
        let rows = sqlx::query("SELECT data FROM apps").fetch_all(&self.pool).await.map_err(map_sqlx_err)?;
        rows.into_iter().map(row_to_app).collect()
    }

    async fn delete(&self, id: uuid::Uuid) -> AppResult<()> {
        let result =
            sqlx::query("DELETE FROM apps WHERE id = $1").bind(id).execute(&self.pool).await.map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("app {id} not found")));
        }
        Ok(())
    }
}

/// In-memory stand-in used by unit tests across this workspace — the
/// relational store is treated as an opaque durable map, and a `HashMap`
/// behind the same trait models that faithfully without a live Postgres
/// instance.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryAppsRepository {
        apps: Mutex<HashMap<uuid::Uuid, App>>,
    }

    #[async_trait]
    impl AppsRepository for InMemoryAppsRepository {
        async fn save(&self, app: &App) -> AppResult<()> {
            let mut apps = self.apps.lock().unwrap();
            if !apps.contains_key(&app.id) {
                let collision = apps.values().any(|existing| {
                    existing.subdomain == app.subdomain
                        || (existing.username == app.username && existing.name == app.name)
                });
                if collision {
                    return Err(AppError::already_exists(format!(
                        "app with subdomain {} or name {}/{} already exists",
                        app.subdomain, app.username, app.name
                    )));
                }
            }
            apps.insert(app.id, app.clone());
            Ok(())
        }

        async fn get_by_id(&self, id: uuid::Uuid) -> AppResult<App> {
            self.apps.lock().unwrap().get(&id).cloned().ok_or_else(|| AppError::not_found(format!("app {id}")))
        }

        async fn get_by_username_name(&self, username: &str, name: &str) -> AppResult<App> {
            self.apps
                .lock()
                .unwrap()
                .values()
                .find(|a| a.username == username && a.name == name)
                .cloned()
                .ok_or_else(|| AppError::not_found(format!("app {username}/{name}")))
        }

        async fn get_by_subdomain(&self, subdomain: &str) -> AppResult<Option<App>> {
            Ok(self.apps.lock().unwrap().values().find(|a| a.subdomain == subdomain).cloned())
        }

        async fn list_by_owner(&self, username: &str) -> AppResult<Vec<App>> {
            Ok(self.apps.lock().unwrap().values().filter(|a| a.username == username).cloned().collect())
        }

        async fn list_by_state(&self, state: AppState) -> AppResult<Vec<App>> {
            Ok(self.apps.lock().unwrap().values().filter(|a| a.state == state).cloned().collect())
        }

        async fn list_all(&self) -> AppResult<Vec<App>> {
            Ok(self.apps.lock().unwrap().values().cloned().collect())
        }

        async fn delete(&self, id: uuid::Uuid) -> AppResult<()> {
            self.apps
                .lock()
                .unwrap()
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| AppError::not_found(format!("app {id}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryAppsRepository;
    use super::*;
    use devplane_types::models::AppState;
    use std::collections::HashMap;

    fn sample_app(username: &str, name: &str, subdomain: &str) -> App {
        App {
            id: uuid::Uuid::new_v4(),
            username: username.to_string(),
            name: name.to_string(),
            state: AppState::Uploading,
            subdomain: subdomain.to_string(),
            base_domain: "apps.example.com".to_string(),
            port: 8080,
            container_name: format!("{username}-container"),
            container_ip: None,
            image: None,
            env_vars: HashMap::new(),
            acl_preset: None,
            error_message: None,
            restart_count: 0,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            deployed_at: None,
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let repo = InMemoryAppsRepository::default();
        let app = sample_app("bob", "web", "bob-web");
        repo.save(&app).await.unwrap();
        let fetched = repo.get_by_id(app.id).await.unwrap();
        assert_eq!(fetched.subdomain, app.subdomain);
    }

    #[tokio::test]
    async fn duplicate_subdomain_rejected() {
        let repo = InMemoryAppsRepository::default();
        repo.save(&sample_app("bob", "web", "bob-web")).await.unwrap();
        let err = repo.save(&sample_app("carol", "site", "bob-web")).await.unwrap_err();
        assert_eq!(err.kind, devplane_types::ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn delete_then_get_not_found() {
        let repo = InMemoryAppsRepository::default();
        let app = sample_app("bob", "web", "bob-web");
        repo.save(&app).await.unwrap();
        repo.delete(app.id).await.unwrap();
        let err = repo.get_by_id(app.id).await.unwrap_err();
        assert_eq!(err.kind, devplane_types::ErrorKind::NotFound);
    }
}
