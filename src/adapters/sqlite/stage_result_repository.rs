//! SQLite implementation of the StageResultRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::StageResult;
use crate::domain::ports::{StageResultFilter, StageResultRepository};

use super::utils::{parse_ts, parse_uuid, placeholders, to_json_string};

#[derive(Clone)]
pub struct SqliteStageResultRepository {
    pool: SqlitePool,
}

impl SqliteStageResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct StageResultRow {
    id: String,
    project_id: String,
    workflow_id: String,
    stage_id: String,
    agent_id: String,
    result_type: String,
    target_type: String,
    target_value: String,
    attributes: String,
    created_at: String,
}

impl TryFrom<StageResultRow> for StageResult {
    type Error = DomainError;

    fn try_from(row: StageResultRow) -> Result<Self, Self::Error> {
        Ok(StageResult {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            workflow_id: parse_uuid(&row.workflow_id)?,
            stage_id: parse_uuid(&row.stage_id)?,
            agent_id: row.agent_id,
            result_type: row.result_type,
            target_type: row.target_type,
            target_value: row.target_value,
            attributes: serde_json::from_str(&row.attributes).unwrap_or(serde_json::Value::Null),
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[async_trait]
impl StageResultRepository for SqliteStageResultRepository {
    async fn insert_batch(&self, results: &[StageResult]) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        for result in results {
            sqlx::query(
                r#"INSERT INTO stage_results (id, project_id, workflow_id, stage_id, agent_id,
                   result_type, target_type, target_value, attributes, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(result.id.to_string())
            .bind(result.project_id.to_string())
            .bind(result.workflow_id.to_string())
            .bind(result.stage_id.to_string())
            .bind(&result.agent_id)
            .bind(&result.result_type)
            .bind(&result.target_type)
            .bind(&result.target_value)
            .bind(to_json_string(&result.attributes)?)
            .bind(result.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, filter: &StageResultFilter) -> DomainResult<Vec<StageResult>> {
        let mut sql = String::from("SELECT * FROM stage_results WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(project_id) = filter.project_id {
            sql.push_str(" AND project_id = ?");
            bindings.push(project_id.to_string());
        }
        if let Some(workflow_id) = filter.workflow_id {
            sql.push_str(" AND workflow_id = ?");
            bindings.push(workflow_id.to_string());
        }
        if let Some(stage_id) = filter.stage_id {
            sql.push_str(" AND stage_id = ?");
            bindings.push(stage_id.to_string());
        }
        if !filter.result_types.is_empty() {
            sql.push_str(&format!(" AND result_type IN ({})", placeholders(filter.result_types.len())));
            bindings.extend(filter.result_types.iter().cloned());
        }
        if !filter.agent_ids.is_empty() {
            sql.push_str(&format!(" AND agent_id IN ({})", placeholders(filter.agent_ids.len())));
            bindings.extend(filter.agent_ids.iter().cloned());
        }
        sql.push_str(" ORDER BY created_at");

        let mut query = sqlx::query_as::<_, StageResultRow>(&sql);
        for binding in &bindings {
            query = query.bind(binding);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(StageResult::try_from).collect()
    }
}
