//! Routes repository: HTTP routes keyed by `full_domain`,
//! plus L4 passthrough routes keyed by `(external_port, protocol)`.

use async_trait::async_trait;
use devplane_types::models::{PassthroughRoute, Protocol, Route};
use devplane_types::{AppError, AppResult};
use sqlx::Row;

#[async_trait]
pub trait RoutesRepository: Send + Sync {
    async fn save_http(&self, route: &Route) -> AppResult<()>;
    async fn get_http(&self, full_domain: &str) -> AppResult<Option<Route>>;
    async fn list_http(&self) -> AppResult<Vec<Route>>;
    async fn delete_http(&self, full_domain: &str) -> AppResult<()>;
    /// Marks the route inactive without removing the record.
    async fn set_http_active(&self, full_domain: &str, active: bool) -> AppResult<()>;

    async fn save_passthrough(&self, route: &PassthroughRoute) -> AppResult<()>;
    async fn list_passthrough(&self) -> AppResult<Vec<PassthroughRoute>>;
    async fn delete_passthrough(&self, external_port: u16, protocol: Protocol) -> AppResult<()>;
}

pub struct PgRoutesRepository {
    pool: sqlx::PgPool,
}

impl PgRoutesRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_err(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::RowNotFound => AppError::not_found("route not found"),
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::already_exists(format!("route already exists: {db_err}"))
        }
        other => AppError::unavailable(format!("database error: {other}")),
    }
}

fn row_to_http_route(row: sqlx::postgres::PgRow) -> AppResult<Route> {
    Ok(Route {
        full_domain: row.try_get("full_domain").map_err(map_sqlx_err)?,
        target_ip: row.try_get("target_ip").map_err(map_sqlx_err)?,
        target_port: row.try_get::<i32, _>("target_port").map_err(map_sqlx_err)? as u16,
        active: row.try_get("active").map_err(map_sqlx_err)?,
    })
}

#[async_trait]
impl RoutesRepository for PgRoutesRepository {
    async fn save_http(&self, route: &Route) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO routes (id, full_domain, target_ip, target_port, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, now(), now())
            ON CONFLICT (full_domain) DO UPDATE SET
                target_ip = EXCLUDED.target_ip,
                target_port = EXCLUDED.target_port,
                active = EXCLUDED.active,
                updated_at = now()
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(&route.full_domain)
        .bind(&route.target_ip)
        .bind(route.target_port as i32)
        .bind(route.active)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn get_http(&self, full_domain: &str) -> AppResult<Option<Route>> {
        let row = sqlx::query("SELECT * FROM routes WHERE full_domain = $1")
            .bind(full_domain)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(row_to_http_route).transpose()
    }

    async fn list_http(&self) -> AppResult<Vec<Route>> {
        let rows = sqlx::query("SELECT * FROM routes").fetch_all(&self.pool).await.map_err(map_sqlx_err)?;
        rows.into_iter().map(row_to_http_route).collect()
    }

    async fn delete_http(&self, full_domain: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM routes WHERE full_domain = $1")
            .bind(full_domain)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn set_http_active(&self, full_domain: &str, active: bool) -> AppResult<()> {
        let result = sqlx::query("UPDATE routes SET active = $1, updated_at = now() WHERE full_domain = $2")
            .bind(active)
            .bind(full_domain)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("route {full_domain}")));
        }
        Ok(())
    }

    async fn save_passthrough(&self, route: &PassthroughRoute) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO passthrough_routes (external_port, protocol, target_ip, target_port)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (external_port, protocol) DO UPDATE SET
                target_ip = EXCLUDED.target_ip,
                target_port = EXCLUDED.target_port
            "#,
        )
        .bind(route.external_port as i32)
        .bind(match route.protocol {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        })
        .bind(&route.target_ip)
        .bind(route.target_port as i32)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn list_passthrough(&self) -> AppResult<Vec<PassthroughRoute>> {
        let rows =
            sqlx::query("SELECT * FROM passthrough_routes").fetch_all(&self.pool).await.map_err(map_sqlx_err)?;
        rows.into_iter()
            .map(|row| {
                let protocol_str: String = row.try_get("protocol").map_err(map_sqlx_err)?;
                Ok(PassthroughRoute {
                    external_port: row.try_get::<i32, _>("external_port").map_err(map_sqlx_err)? as u16,
                    protocol: if protocol_str == "udp" { Protocol::Udp } else { Protocol::Tcp },
                    target_ip: row.try_get("target_ip").map_err(map_sqlx_err)?,
                    target_port: row.try_get::<i32, _>("target_port").map_err(map_sqlx_err)? as u16,
                })
            })
            .collect()
    }

    async fn delete_passthrough(&self, external_port: u16, protocol: Protocol) -> AppResult<()> {
        sqlx::query("DELETE FROM passthrough_routes WHERE external_port = $1 AND protocol = $2")
            .bind(external_port as i32)
            .bind(match protocol {
                Protocol::Tcp => "tcp",
                Protocol::Udp => "udp",
            })
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }
}

pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryRoutesRepository {
        http: Mutex<HashMap<String, Route>>,
        passthrough: Mutex<HashMap<(u16, Protocol), PassthroughRoute>>,
    }

    #[async_trait]
    impl RoutesRepository for InMemoryRoutesRepository {
        async fn save_http(&self, route: &Route) -> AppResult<()> {
            self.http.lock().unwrap().insert(route.full_domain.clone(), route.clone());
            Ok(())
        }

        async fn get_http(&self, full_domain: &str) -> AppResult<Option<Route>> {
            Ok(self.http.lock().unwrap().get(full_domain).cloned())
        }

        async fn list_http(&self) -> AppResult<Vec<Route>> {
            Ok(self.http.lock().unwrap().values().cloned().collect())
        }

        async fn delete_http(&self, full_domain: &str) -> AppResult<()> {
            self.http.lock().unwrap().remove(full_domain);
            Ok(())
        }

        async fn set_http_active(&self, full_domain: &str, active: bool) -> AppResult<()> {
            let mut http = self.http.lock().unwrap();
            let route = http.get_mut(full_domain).ok_or_else(|| AppError::not_found(full_domain.to_string()))?;
            route.active = active;
            Ok(())
        }

        async fn save_passthrough(&self, route: &PassthroughRoute) -> AppResult<()> {
            self.passthrough.lock().unwrap().insert((route.external_port, route.protocol), route.clone());
            Ok(())
        }

        async fn list_passthrough(&self) -> AppResult<Vec<PassthroughRoute>> {
            Ok(self.passthrough.lock().unwrap().values().cloned().collect())
        }

        async fn delete_passthrough(&self, external_port: u16, protocol: Protocol) -> AppResult<()> {
            self.passthrough.lock().unwrap().remove(&(external_port, protocol));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryRoutesRepository;
    use super::*;

    #[tokio::test]
    async fn add_list_delete_round_trip() {
        let repo = InMemoryRoutesRepository::default();
        let route = Route { full_domain: "bob-web.apps.example.com".into(), target_ip: "10.0.0.2".into(), target_port: 8080, active: true };
        repo.save_http(&route).await.unwrap();
        assert!(repo.list_http().await.unwrap().iter().any(|r| r.full_domain == route.full_domain));
        repo.delete_http(&route.full_domain).await.unwrap();
        assert!(!repo.list_http().await.unwrap().iter().any(|r| r.full_domain == route.full_domain));
    }

    #[tokio::test]
    async fn stop_marks_inactive_without_removing() {
        let repo = InMemoryRoutesRepository::default();
        let route = Route { full_domain: "bob-web.apps.example.com".into(), target_ip: "10.0.0.2".into(), target_port: 8080, active: true };
        repo.save_http(&route).await.unwrap();
        repo.set_http_active(&route.full_domain, false).await.unwrap();
        let fetched = repo.get_http(&route.full_domain).await.unwrap().unwrap();
        assert!(!fetched.active);
    }
}
