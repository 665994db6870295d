//! SQLite implementation of the ProjectRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Project, ProjectStatus};
use crate::domain::ports::ProjectRepository;

use super::utils::{parse_string_vec, parse_ts, parse_uuid, to_json_string};

#[derive(Clone)]
pub struct SqliteProjectRepository {
    pool: SqlitePool,
}

impl SqliteProjectRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    scope: String,
    status: String,
    tags: String,
    failure_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ProjectRow> for Project {
    type Error = DomainError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Project {
            id: parse_uuid(&row.id)?,
            name: row.name,
            scope: parse_string_vec(&row.scope)?,
            status: ProjectStatus::parse_str(&row.status)
                .ok_or_else(|| DomainError::Serialization(format!("unknown project status {:?}", row.status)))?,
            tags: parse_string_vec(&row.tags)?,
            failure_reason: row.failure_reason,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl ProjectRepository for SqliteProjectRepository {
    async fn create(&self, project: &Project) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO projects (id, name, scope, status, tags, failure_reason, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(project.id.to_string())
        .bind(&project.name)
        .bind(to_json_string(&project.scope)?)
        .bind(project.status.as_str())
        .bind(to_json_string(&project.tags)?)
        .bind(&project.failure_reason)
        .bind(project.created_at.to_rfc3339())
        .bind(project.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Project>> {
        let row: Option<ProjectRow> = sqlx::query_as("SELECT * FROM projects WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Project::try_from).transpose()
    }

    async fn list_by_status(&self, status: ProjectStatus) -> DomainResult<Vec<Project>> {
        let rows: Vec<ProjectRow> = sqlx::query_as("SELECT * FROM projects WHERE status = ? ORDER BY created_at")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Project::try_from).collect()
    }

    async fn update_status(&self, id: Uuid, from: ProjectStatus, to: ProjectStatus) -> DomainResult<bool> {
        if !from.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        let result = sqlx::query("UPDATE projects SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_failed(&self, id: Uuid, reason: &str) -> DomainResult<()> {
        sqlx::query(
            r#"UPDATE projects SET status = 'failed', failure_reason = ?, updated_at = ?
               WHERE id = ? AND status NOT IN ('finished', 'failed')"#,
        )
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_scope(&self, id: Uuid, scope: &[String]) -> DomainResult<()> {
        let dispatched: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM agent_tasks WHERE project_id = ? AND dispatched_at IS NOT NULL LIMIT 1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        if dispatched.is_some() {
            return Err(DomainError::ValidationFailed(
                "project scope is immutable after first dispatch".to_string(),
            ));
        }

        let result = sqlx::query("UPDATE projects SET scope = ?, updated_at = ? WHERE id = ?")
            .bind(to_json_string(&scope)?)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::ProjectNotFound(id));
        }
        Ok(())
    }

    async fn update_tags(&self, id: Uuid, tags: &[String]) -> DomainResult<()> {
        let result = sqlx::query("UPDATE projects SET tags = ?, updated_at = ? WHERE id = ?")
            .bind(to_json_string(&tags)?)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::ProjectNotFound(id));
        }
        Ok(())
    }
}
