//! SQLite implementation of the TaskRepository.
//!
//! Every status transition is a conditional `UPDATE` keyed on the expected
//! current status. Under concurrent schedulers exactly one caller wins a
//! claim; the rest see zero rows affected and treat the attempt as a no-op.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentTask, PolicySnapshot, TaskStatus};
use crate::domain::ports::{TaskCounts, TaskRepository};

use super::utils::{parse_opt_ts, parse_string_vec, parse_ts, parse_uuid, placeholders, to_json_string};

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    project_id: String,
    workflow_id: String,
    stage_id: String,
    agent_id: Option<String>,
    input_target: String,
    target_value: String,
    tool_name: String,
    tool_params: String,
    required_tags: String,
    status: String,
    retry_count: i64,
    policy_snapshot: String,
    timeout_secs: i64,
    failure_reason: Option<String>,
    created_at: String,
    dispatched_at: Option<String>,
    finished_at: Option<String>,
}

impl TryFrom<TaskRow> for AgentTask {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let policy_snapshot: PolicySnapshot = serde_json::from_str(&row.policy_snapshot)
            .map_err(|e| DomainError::Serialization(format!("malformed policy snapshot on task {}: {e}", row.id)))?;

        Ok(AgentTask {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            workflow_id: parse_uuid(&row.workflow_id)?,
            stage_id: parse_uuid(&row.stage_id)?,
            agent_id: row.agent_id,
            input_target: row.input_target,
            target_value: row.target_value,
            tool_name: row.tool_name,
            tool_params: serde_json::from_str(&row.tool_params).unwrap_or(serde_json::Value::Null),
            required_tags: parse_string_vec(&row.required_tags)?,
            status: TaskStatus::parse_str(&row.status)
                .ok_or_else(|| DomainError::Serialization(format!("unknown task status {:?}", row.status)))?,
            retry_count: row.retry_count.max(0) as u32,
            policy_snapshot,
            timeout_secs: row.timeout_secs.max(0) as u64,
            failure_reason: row.failure_reason,
            created_at: parse_ts(&row.created_at)?,
            dispatched_at: parse_opt_ts(row.dispatched_at.as_deref())?,
            finished_at: parse_opt_ts(row.finished_at.as_deref())?,
        })
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create_batch(&self, tasks: &[AgentTask]) -> DomainResult<u64> {
        let mut inserted = 0u64;
        let mut tx = self.pool.begin().await?;

        for task in tasks {
            let result = sqlx::query(
                r#"INSERT OR IGNORE INTO agent_tasks (id, project_id, workflow_id, stage_id, agent_id,
                   input_target, target_value, tool_name, tool_params, required_tags, status,
                   retry_count, policy_snapshot, timeout_secs, failure_reason, created_at,
                   dispatched_at, finished_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(task.id.to_string())
            .bind(task.project_id.to_string())
            .bind(task.workflow_id.to_string())
            .bind(task.stage_id.to_string())
            .bind(&task.agent_id)
            .bind(&task.input_target)
            .bind(&task.target_value)
            .bind(&task.tool_name)
            .bind(to_json_string(&task.tool_params)?)
            .bind(to_json_string(&task.required_tags)?)
            .bind(task.status.as_str())
            .bind(i64::from(task.retry_count))
            .bind(to_json_string(&task.policy_snapshot)?)
            .bind(task.timeout_secs.min(i64::MAX as u64) as i64)
            .bind(&task.failure_reason)
            .bind(task.created_at.to_rfc3339())
            .bind(task.dispatched_at.map(|t| t.to_rfc3339()))
            .bind(task.finished_at.map(|t| t.to_rfc3339()))
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<AgentTask>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM agent_tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(AgentTask::try_from).transpose()
    }

    async fn list_by_status(&self, status: TaskStatus, limit: usize) -> DomainResult<Vec<AgentTask>> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM agent_tasks WHERE status = ? ORDER BY created_at LIMIT ?")
                .bind(status.as_str())
                .bind(limit.min(i64::MAX as usize) as i64)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(AgentTask::try_from).collect()
    }

    async fn list_for_stage(&self, stage_id: Uuid) -> DomainResult<Vec<AgentTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM agent_tasks WHERE stage_id = ? ORDER BY created_at")
            .bind(stage_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(AgentTask::try_from).collect()
    }

    async fn list_for_project(&self, project_id: Uuid) -> DomainResult<Vec<AgentTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM agent_tasks WHERE project_id = ? ORDER BY created_at")
            .bind(project_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(AgentTask::try_from).collect()
    }

    async fn stage_counts(&self, project_id: Uuid, workflow_id: Uuid) -> DomainResult<HashMap<Uuid, TaskCounts>> {
        let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
            r#"SELECT stage_id,
                      COUNT(*),
                      SUM(status NOT IN ('finished', 'failed', 'cancelled')),
                      SUM(status = 'failed')
               FROM agent_tasks
               WHERE project_id = ? AND workflow_id = ?
               GROUP BY stage_id"#,
        )
        .bind(project_id.to_string())
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::with_capacity(rows.len());
        for (stage_id, total, unfinished, failed) in rows {
            counts.insert(
                parse_uuid(&stage_id)?,
                TaskCounts {
                    total: total.max(0) as u64,
                    unfinished: unfinished.max(0) as u64,
                    failed: failed.max(0) as u64,
                },
            );
        }
        Ok(counts)
    }

    async fn assign(&self, id: Uuid, agent_id: &str) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE agent_tasks SET status = 'assigned', agent_id = ?, dispatched_at = ?
               WHERE id = ? AND status = 'pending'"#,
        )
        .bind(agent_id)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revert_assignment(&self, id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE agent_tasks SET status = 'pending', agent_id = NULL, dispatched_at = NULL,
               retry_count = retry_count + 1
               WHERE id = ? AND status = 'assigned'"#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn transition(&self, id: Uuid, from: TaskStatus, to: TaskStatus) -> DomainResult<bool> {
        if !from.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        let result = if to.is_terminal() {
            sqlx::query("UPDATE agent_tasks SET status = ?, finished_at = ? WHERE id = ? AND status = ?")
                .bind(to.as_str())
                .bind(Utc::now().to_rfc3339())
                .bind(id.to_string())
                .bind(from.as_str())
                .execute(&self.pool)
                .await?
        } else {
            sqlx::query("UPDATE agent_tasks SET status = ? WHERE id = ? AND status = ?")
                .bind(to.as_str())
                .bind(id.to_string())
                .bind(from.as_str())
                .execute(&self.pool)
                .await?
        };
        Ok(result.rows_affected() > 0)
    }

    async fn fail(&self, id: Uuid, from: TaskStatus, reason: &str) -> DomainResult<bool> {
        if !from.can_transition_to(TaskStatus::Failed) {
            return Err(DomainError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: TaskStatus::Failed.as_str().to_string(),
            });
        }

        let result = sqlx::query(
            r#"UPDATE agent_tasks SET status = 'failed', failure_reason = ?, finished_at = ?
               WHERE id = ? AND status = ?"#,
        )
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn agent_ids_for_stage(&self, stage_id: Uuid, statuses: &[TaskStatus]) -> DomainResult<Vec<String>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT DISTINCT agent_id FROM agent_tasks
             WHERE stage_id = ? AND agent_id IS NOT NULL AND status IN ({})",
            placeholders(statuses.len())
        );
        let mut query = sqlx::query_as::<_, (String,)>(&sql).bind(stage_id.to_string());
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn list_timed_out(&self, now: DateTime<Utc>) -> DomainResult<Vec<AgentTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"SELECT * FROM agent_tasks
               WHERE status IN ('dispatched', 'running')
                 AND dispatched_at IS NOT NULL
                 AND datetime(dispatched_at, '+' || timeout_secs || ' seconds') <= datetime(?)"#,
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AgentTask::try_from).collect()
    }

    async fn list_stuck_pending(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<AgentTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM agent_tasks WHERE status = 'pending' AND datetime(created_at) <= datetime(?)",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AgentTask::try_from).collect()
    }
}
