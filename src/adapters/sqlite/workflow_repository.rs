//! SQLite implementation of the WorkflowRepository.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutionMode, ScanStage, StageDag, TargetPolicy, Workflow};
use crate::domain::ports::WorkflowRepository;

use super::utils::{parse_string_vec, parse_ts, parse_uuid, parse_uuid_vec, to_json_string};

#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: String,
    project_id: String,
    name: String,
    execution_mode: String,
    created_at: String,
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = DomainError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        Ok(Workflow {
            id: parse_uuid(&row.id)?,
            project_id: parse_uuid(&row.project_id)?,
            name: row.name,
            execution_mode: ExecutionMode::parse_str(&row.execution_mode)
                .ok_or_else(|| DomainError::Serialization(format!("unknown execution mode {:?}", row.execution_mode)))?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StageRow {
    id: String,
    workflow_id: String,
    name: String,
    stage_order: i64,
    predecessors: String,
    tool_name: String,
    tool_config: String,
    target_policy: String,
    required_tags: String,
    timeout_secs: i64,
    retry_max: i64,
    created_at: String,
}

impl TryFrom<StageRow> for ScanStage {
    type Error = DomainError;

    fn try_from(row: StageRow) -> Result<Self, Self::Error> {
        let target_policy: TargetPolicy = serde_json::from_str(&row.target_policy)
            .map_err(|e| DomainError::Configuration(format!("malformed target policy on stage {}: {e}", row.id)))?;

        Ok(ScanStage {
            id: parse_uuid(&row.id)?,
            workflow_id: parse_uuid(&row.workflow_id)?,
            name: row.name,
            stage_order: row.stage_order,
            predecessors: parse_uuid_vec(&row.predecessors)?,
            tool_name: row.tool_name,
            tool_config: serde_json::from_str(&row.tool_config).unwrap_or(serde_json::Value::Null),
            target_policy,
            required_tags: parse_string_vec(&row.required_tags)?,
            timeout_secs: row.timeout_secs.max(0) as u64,
            retry_max: row.retry_max.max(0) as u32,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[async_trait]
impl WorkflowRepository for SqliteWorkflowRepository {
    async fn create(&self, workflow: &Workflow) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO workflows (id, project_id, name, execution_mode, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.project_id.to_string())
        .bind(&workflow.name)
        .bind(workflow.execution_mode.as_str())
        .bind(workflow.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Workflow>> {
        let row: Option<WorkflowRow> = sqlx::query_as("SELECT * FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Workflow::try_from).transpose()
    }

    async fn list_for_project(&self, project_id: Uuid) -> DomainResult<Vec<Workflow>> {
        let rows: Vec<WorkflowRow> =
            sqlx::query_as("SELECT * FROM workflows WHERE project_id = ? ORDER BY created_at")
                .bind(project_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Workflow::try_from).collect()
    }

    async fn insert_stage(&self, stage: &ScanStage) -> DomainResult<()> {
        // Validate the graph as it would look after the insert; a cyclic
        // or foreign-predecessor graph refuses the save.
        let mut stages = self.list_stages(stage.workflow_id).await?;
        stages.retain(|s| s.id != stage.id);
        stages.push(stage.clone());
        StageDag::new(stage.workflow_id, &stages).validate()?;

        sqlx::query(
            r#"INSERT INTO scan_stages (id, workflow_id, name, stage_order, predecessors, tool_name,
               tool_config, target_policy, required_tags, timeout_secs, retry_max, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(stage.id.to_string())
        .bind(stage.workflow_id.to_string())
        .bind(&stage.name)
        .bind(stage.stage_order)
        .bind(to_json_string(&stage.predecessors.iter().map(ToString::to_string).collect::<Vec<_>>())?)
        .bind(&stage.tool_name)
        .bind(to_json_string(&stage.tool_config)?)
        .bind(to_json_string(&stage.target_policy)?)
        .bind(to_json_string(&stage.required_tags)?)
        .bind(stage.timeout_secs.min(i64::MAX as u64) as i64)
        .bind(i64::from(stage.retry_max))
        .bind(stage.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_stage(&self, stage_id: Uuid) -> DomainResult<Option<ScanStage>> {
        let row: Option<StageRow> = sqlx::query_as("SELECT * FROM scan_stages WHERE id = ?")
            .bind(stage_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(ScanStage::try_from).transpose()
    }

    async fn list_stages(&self, workflow_id: Uuid) -> DomainResult<Vec<ScanStage>> {
        let rows: Vec<StageRow> =
            sqlx::query_as("SELECT * FROM scan_stages WHERE workflow_id = ? ORDER BY stage_order, id")
                .bind(workflow_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(ScanStage::try_from).collect()
    }

    async fn record_stage_run(&self, stage_id: Uuid, project_id: Uuid, task_count: u64) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO stage_runs (stage_id, project_id, task_count, materialized_at)
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(stage_id.to_string())
        .bind(project_id.to_string())
        .bind(task_count.min(i64::MAX as u64) as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn materialized_stages(&self, project_id: Uuid, workflow_id: Uuid) -> DomainResult<HashSet<Uuid>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"SELECT sr.stage_id FROM stage_runs sr
               JOIN scan_stages ss ON ss.id = sr.stage_id
               WHERE sr.project_id = ? AND ss.workflow_id = ?"#,
        )
        .bind(project_id.to_string())
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|(id,)| parse_uuid(id)).collect()
    }
}
