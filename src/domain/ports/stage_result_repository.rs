//! Stage-result repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::StageResult;

/// Filter for stage-result queries.
#[derive(Debug, Clone, Default)]
pub struct StageResultFilter {
    pub project_id: Option<Uuid>,
    pub workflow_id: Option<Uuid>,
    pub stage_id: Option<Uuid>,
    /// Restrict to these result types when non-empty.
    pub result_types: Vec<String>,
    /// Restrict to results emitted by these agents when non-empty.
    pub agent_ids: Vec<String>,
}

impl StageResultFilter {
    pub fn for_stage(project_id: Uuid, workflow_id: Uuid, stage_id: Uuid) -> Self {
        Self {
            project_id: Some(project_id),
            workflow_id: Some(workflow_id),
            stage_id: Some(stage_id),
            ..Self::default()
        }
    }
}

/// Repository interface for stage results.
#[async_trait]
pub trait StageResultRepository: Send + Sync {
    async fn insert_batch(&self, results: &[StageResult]) -> DomainResult<()>;

    async fn query(&self, filter: &StageResultFilter) -> DomainResult<Vec<StageResult>>;
}
