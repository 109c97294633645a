//! Project database repository.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

use super::models::Project;
use crate::container::HandleState;

/// Persistence boundary for projects.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Project>>;
    async fn find_by_container(&self, container_id: &str) -> Result<Option<Project>>;
    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<Project>>;
    async fn insert(&self, project: &Project) -> Result<()>;
    /// Record (or clear) the container handle of a project.
    async fn set_container(
        &self,
        id: &str,
        container_id: Option<&str>,
        state: Option<HandleState>,
    ) -> Result<()>;
    async fn set_container_state(&self, id: &str, state: HandleState) -> Result<()>;
    /// Delete a project; returns whether a row was removed.
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// SQLite-backed [`ProjectStore`].
#[derive(Debug, Clone)]
pub struct ProjectRepository {
    pool: SqlitePool,
}

impl ProjectRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const PROJECT_COLUMNS: &str = "id, name, description, owner_id, container_id, container_state, created_at, updated_at";

#[async_trait]
impl ProjectStore for ProjectRepository {
    async fn get(&self, id: &str) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {} FROM projects WHERE id = ?",
            PROJECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching project")?;

        Ok(project)
    }

    async fn find_by_container(&self, container_id: &str) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(&format!(
            "SELECT {} FROM projects WHERE container_id = ?",
            PROJECT_COLUMNS
        ))
        .bind(container_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching project by container")?;

        Ok(project)
    }

    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<Project>> {
        let projects = match owner_id {
            Some(owner) => {
                sqlx::query_as::<_, Project>(&format!(
                    "SELECT {} FROM projects WHERE owner_id = ? ORDER BY created_at DESC",
                    PROJECT_COLUMNS
                ))
                .bind(owner)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Project>(&format!(
                    "SELECT {} FROM projects ORDER BY created_at DESC",
                    PROJECT_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("listing projects")?;

        Ok(projects)
    }

    async fn insert(&self, project: &Project) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (
                id, name, description, owner_id, container_id, container_state,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(&project.owner_id)
        .bind(&project.container_id)
        .bind(project.container_state)
        .bind(&project.created_at)
        .bind(&project.updated_at)
        .execute(&self.pool)
        .await
        .context("creating project")?;

        Ok(())
    }

    async fn set_container(
        &self,
        id: &str,
        container_id: Option<&str>,
        state: Option<HandleState>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE projects
            SET container_id = ?, container_state = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(container_id)
        .bind(state)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("updating project container")?;

        Ok(())
    }

    async fn set_container_state(&self, id: &str, state: HandleState) -> Result<()> {
        sqlx::query("UPDATE projects SET container_state = ?, updated_at = ? WHERE id = ?")
            .bind(state)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("updating container state")?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting project")?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn repo() -> ProjectRepository {
        let db = Database::in_memory().await.unwrap();
        ProjectRepository::new(db.pool().clone())
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = repo().await;
        let project = Project::new("p1", "demo", "a demo", "u1");
        repo.insert(&project).await.unwrap();

        let loaded = repo.get("p1").await.unwrap().unwrap();
        assert_eq!(loaded, project);
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_container_and_lookup() {
        let repo = repo().await;
        repo.insert(&Project::new("p1", "demo", "", "u1")).await.unwrap();
        repo.set_container("p1", Some("c1"), Some(HandleState::Running))
            .await
            .unwrap();

        let project = repo.find_by_container("c1").await.unwrap().unwrap();
        assert_eq!(project.id, "p1");
        assert_eq!(project.container_state, Some(HandleState::Running));

        repo.set_container_state("p1", HandleState::Stopped).await.unwrap();
        let project = repo.get("p1").await.unwrap().unwrap();
        assert_eq!(project.handle().unwrap().state, HandleState::Stopped);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let repo = repo().await;
        repo.insert(&Project::new("p1", "one", "", "u1")).await.unwrap();
        repo.insert(&Project::new("p2", "two", "", "u2")).await.unwrap();

        assert_eq!(repo.list(None).await.unwrap().len(), 2);
        let mine = repo.list(Some("u1")).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, "p1");

        assert!(repo.delete("p1").await.unwrap());
        assert!(!repo.delete("p1").await.unwrap());
        assert!(repo.get("p1").await.unwrap().is_none());
    }
}
