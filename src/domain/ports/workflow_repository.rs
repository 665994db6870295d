//! Workflow and stage repository port.

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ScanStage, Workflow};

/// Repository interface for workflows, their stages, and the stage-run
/// materialization barrier.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn create(&self, workflow: &Workflow) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Workflow>>;

    async fn list_for_project(&self, project_id: Uuid) -> DomainResult<Vec<Workflow>>;

    /// Persist a stage. The stage graph (existing stages plus this one) is
    /// validated first; a cyclic or foreign-predecessor graph refuses the
    /// save.
    async fn insert_stage(&self, stage: &ScanStage) -> DomainResult<()>;

    async fn get_stage(&self, stage_id: Uuid) -> DomainResult<Option<ScanStage>>;

    /// Stages of a workflow, ordered by `stage_order`.
    async fn list_stages(&self, workflow_id: Uuid) -> DomainResult<Vec<ScanStage>>;

    /// Record that a stage was materialized for a project, even when it
    /// produced zero tasks. Returns false when a run was already recorded;
    /// the insert is the idempotency barrier for materialization.
    async fn record_stage_run(&self, stage_id: Uuid, project_id: Uuid, task_count: u64) -> DomainResult<bool>;

    /// Stage ids of this workflow already materialized for the project.
    async fn materialized_stages(&self, project_id: Uuid, workflow_id: Uuid) -> DomainResult<HashSet<Uuid>>;
}
