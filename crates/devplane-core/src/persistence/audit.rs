//! Durable shadow of the in-process event bus: every
//! lifecycle transition and pipeline stage change is appended here so a
//! daemon restart doesn't lose the last-known reason for a `FAILED`/`ERROR`
//! state, and `GetApp`/`GetContainer` can return a history tail. The live
//! event bus (C2) remains the UI's real-time mechanism; this is append-only
//! and never read from the request hot path.

use async_trait::async_trait;
use devplane_types::models::{EventKind, ResourceType};
use devplane_types::{AppError, AppResult};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> AppResult<()>;

    async fn tail(&self, resource_type: ResourceType, resource_id: &str, limit: i64) -> AppResult<Vec<AuditEntry>>;
}

pub struct PgAuditLog {
    pool: sqlx::PgPool,
}

impl PgAuditLog {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_err(err: sqlx::Error) -> AppError {
    AppError::unavailable(format!("database error: {err}"))
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn append(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> AppResult<()> {
        sqlx::query("INSERT INTO audit_events (resource_type, resource_id, kind, payload) VALUES ($1, $2, $3, $4)")
            .bind(serde_json::to_string(&resource_type).unwrap_or_default().trim_matches('"'))
            .bind(resource_id)
            .bind(serde_json::to_string(&kind).unwrap_or_default().trim_matches('"'))
            .bind(&payload)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn tail(&self, resource_type: ResourceType, resource_id: &str, limit: i64) -> AppResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT resource_type, resource_id, kind, payload, occurred_at FROM audit_events \
             WHERE resource_type = $1 AND resource_id = $2 ORDER BY id DESC LIMIT $3",
        )
        .bind(serde_json::to_string(&resource_type).unwrap_or_default().trim_matches('"'))
        .bind(resource_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.into_iter()
            .map(|row| {
                let kind_str: String = row.try_get("kind").map_err(map_sqlx_err)?;
                let kind: EventKind = serde_json::from_value(serde_json::Value::String(kind_str))
                    .map_err(|e| AppError::internal(format!("decoding audit kind: {e}")))?;
                Ok(AuditEntry {
                    resource_type,
                    resource_id: row.try_get("resource_id").map_err(map_sqlx_err)?,
                    kind,
                    payload: row.try_get("payload").map_err(map_sqlx_err)?,
                    occurred_at: row.try_get("occurred_at").map_err(map_sqlx_err)?,
                })
            })
            .collect()
    }
}

pub mod memory {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryAuditLog {
        entries: Mutex<Vec<AuditEntry>>,
    }

    #[async_trait]
    impl AuditLog for InMemoryAuditLog {
        async fn append(
            &self,
            resource_type: ResourceType,
            resource_id: &str,
            kind: EventKind,
            payload: serde_json::Value,
        ) -> AppResult<()> {
            self.entries.lock().unwrap().push(AuditEntry {
                resource_type,
                resource_id: resource_id.to_string(),
                kind,
                payload,
                occurred_at: chrono::Utc::now(),
            });
            Ok(())
        }

        async fn tail(&self, resource_type: ResourceType, resource_id: &str, limit: i64) -> AppResult<Vec<AuditEntry>> {
            let entries = self.entries.lock().unwrap();
            Ok(entries
                .iter()
                .rev()
                .filter(|e| e.resource_type == resource_type && e.resource_id == resource_id)
                .take(limit.max(0) as usize)
                .cloned()
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryAuditLog;
    use super::*;

    #[tokio::test]
    async fn tail_returns_most_recent_first_filtered_by_resource() {
        let log = InMemoryAuditLog::default();
        log.append(ResourceType::App, "bob/web", EventKind::AppDeployed, serde_json::json!({"n": 1})).await.unwrap();
        log.append(ResourceType::Container, "bob", EventKind::ContainerCreated, serde_json::json!({"n": 2})).await.unwrap();
        log.append(ResourceType::App, "bob/web", EventKind::AppDeployed, serde_json::json!({"n": 3})).await.unwrap();

        let tail = log.tail(ResourceType::App, "bob/web", 10).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].payload, serde_json::json!({"n": 3}));
        assert_eq!(tail[1].payload, serde_json::json!({"n": 1}));
    }
}
