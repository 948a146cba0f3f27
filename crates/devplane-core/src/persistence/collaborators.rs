//! Collaborators repository. Key: `(container_name,
//! collaborator_username)`.

use async_trait::async_trait;
use devplane_types::models::Collaborator;
use devplane_types::{AppError, AppResult};
use sqlx::Row;

#[async_trait]
pub trait CollaboratorsRepository: Send + Sync {
    async fn save(&self, collaborator: &Collaborator) -> AppResult<()>;
    async fn get(&self, container_name: &str, collaborator_username: &str) -> AppResult<Collaborator>;
    async fn list_by_container(&self, container_name: &str) -> AppResult<Vec<Collaborator>>;
    async fn delete(&self, container_name: &str, collaborator_username: &str) -> AppResult<()>;
    /// Removes every collaborator on `container_name` — used by the
    /// lifecycle engine's DevBox-delete cascade.
    async fn delete_all_for_container(&self, container_name: &str) -> AppResult<()>;
}

pub struct PgCollaboratorsRepository {
    pool: sqlx::PgPool,
}

impl PgCollaboratorsRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx_err(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::RowNotFound => AppError::not_found("collaborator not found"),
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::already_exists(format!("collaborator already exists: {db_err}"))
        }
        other => AppError::unavailable(format!("database error: {other}")),
    }
}

fn row_to_collaborator(row: sqlx::postgres::PgRow) -> AppResult<Collaborator> {
    Ok(Collaborator {
        container_name: row.try_get("container_name").map_err(map_sqlx_err)?,
        collaborator_username: row.try_get("collaborator_username").map_err(map_sqlx_err)?,
        owner_username: row.try_get("owner_username").map_err(map_sqlx_err)?,
        account_name: row.try_get("account_name").map_err(map_sqlx_err)?,
        ssh_public_key: row.try_get("ssh_public_key").map_err(map_sqlx_err)?,
        has_sudo: row.try_get("has_sudo").map_err(map_sqlx_err)?,
        has_container_runtime: row.try_get("has_container_runtime").map_err(map_sqlx_err)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_err)?,
        created_by: row.try_get("created_by").map_err(map_sqlx_err)?,
    })
}

#[async_trait]
impl CollaboratorsRepository for PgCollaboratorsRepository {
    async fn save(&self, collaborator: &Collaborator) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO collaborators
                (id, container_name, owner_username, collaborator_username, account_name,
                 ssh_public_key, has_sudo, has_container_runtime, created_at, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (container_name, collaborator_username) DO UPDATE SET
                ssh_public_key = EXCLUDED.ssh_public_key,
                has_sudo = EXCLUDED.has_sudo,
                has_container_runtime = EXCLUDED.has_container_runtime
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(&collaborator.container_name)
        .bind(&collaborator.owner_username)
        .bind(&collaborator.collaborator_username)
        .bind(&collaborator.account_name)
        .bind(&collaborator.ssh_public_key)
        .bind(collaborator.has_sudo)
        .bind(collaborator.has_container_runtime)
        .bind(collaborator.created_at)
        .bind(&collaborator.created_by)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn get(&self, container_name: &str, collaborator_username: &str) -> AppResult<Collaborator> {
        let row = sqlx::query(
            "SELECT * FROM collaborators WHERE container_name = $1 AND collaborator_username = $2",
        )
        .bind(container_name)
        .bind(collaborator_username)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| AppError::not_found(format!("collaborator {collaborator_username} on {container_name}")))?;
        row_to_collaborator(row)
    }

    async fn list_by_container(&self, container_name: &str) -> AppResult<Vec<Collaborator>> {
        let rows = sqlx::query("SELECT * FROM collaborators WHERE container_name = $1")
            .bind(container_name)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.into_iter().map(row_to_collaborator).collect()
    }

    async fn delete(&self, container_name: &str, collaborator_username: &str) -> AppResult<()> {
        let result = sqlx::query(
            "DELETE FROM collaborators WHERE container_name = $1 AND collaborator_username = $2",
        )
        .bind(container_name)
        .bind(collaborator_username)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("collaborator {collaborator_username} on {container_name}")));
        }
        Ok(())
    }

    async fn delete_all_for_container(&self, container_name: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM collaborators WHERE container_name = $1")
            .bind(container_name)
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
    pub struct InMemoryCollaboratorsRepository {
        collaborators: Mutex<HashMap<(String, String), Collaborator>>,
    }

    #[async_trait]
    impl CollaboratorsRepository for InMemoryCollaboratorsRepository {
        async fn save(&self, collaborator: &Collaborator) -> AppResult<()> {
            let key = (collaborator.container_name.clone(), collaborator.collaborator_username.clone());
            self.collaborators.lock().unwrap().insert(key, collaborator.clone());
            Ok(())
        }

        async fn get(&self, container_name: &str, collaborator_username: &str) -> AppResult<Collaborator> {
            self.collaborators
                .lock()
                .unwrap()
                .get(&(container_name.to_string(), collaborator_username.to_string()))
                .cloned()
                .ok_or_else(|| AppError::not_found(format!("collaborator {collaborator_username} on {container_name}")))
        }

        async fn list_by_container(&self, container_name: &str) -> AppResult<Vec<Collaborator>> {
            Ok(self
                .collaborators
                .lock()
                .unwrap()
                .values()
                .filter(|c| c.container_name == container_name)
                .cloned()
                .collect())
        }

        async fn delete(&self, container_name: &str, collaborator_username: &str) -> AppResult<()> {
            self.collaborators
                .lock()
                .unwrap()
                .remove(&(container_name.to_string(), collaborator_username.to_string()))
                .map(|_| ())
                .ok_or_else(|| AppError::not_found(format!("collaborator {collaborator_username} on {container_name}")))
        }

        async fn delete_all_for_container(&self, container_name: &str) -> AppResult<()> {
            self.collaborators.lock().unwrap().retain(|k, _| k.0 != container_name);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryCollaboratorsRepository;
    use super::*;

    fn sample(container: &str, collaborator: &str) -> Collaborator {
        Collaborator {
            container_name: container.to_string(),
            collaborator_username: collaborator.to_string(),
            owner_username: "bob".to_string(),
            account_name: Collaborator::account_name_for("bob", collaborator),
            ssh_public_key: "ssh-ed25519 AAAA".to_string(),
            has_sudo: false,
            has_container_runtime: false,
            created_at: chrono::Utc::now(),
            created_by: "bob".to_string(),
        }
    }

    #[tokio::test]
    async fn save_and_cascade_delete() {
        let repo = InMemoryCollaboratorsRepository::default();
        repo.save(&sample("bob-container", "carol")).await.unwrap();
        repo.save(&sample("bob-container", "dave")).await.unwrap();
        assert_eq!(repo.list_by_container("bob-container").await.unwrap().len(), 2);
        repo.delete_all_for_container("bob-container").await.unwrap();
        assert!(repo.list_by_container("bob-container").await.unwrap().is_empty());
    }
}
