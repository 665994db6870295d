//! Task repository port.
//!
//! Status transitions are compare-and-set against the current status: the
//! `UPDATE` is keyed on the expected `from` status and reports whether it
//! won. This is what makes claim-for-dispatch at-most-once under
//! concurrent schedulers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentTask, TaskStatus};

/// Per-stage task counts, joined with stage-run records into readiness
/// summaries by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: u64,
    pub unfinished: u64,
    pub failed: u64,
}

/// Repository interface for agent-task persistence.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a batch of freshly materialized tasks. Insertion is
    /// idempotent per `(stage_id, target_value)`; re-materializing a stage
    /// silently skips rows that already exist. Returns the number actually
    /// inserted.
    async fn create_batch(&self, tasks: &[AgentTask]) -> DomainResult<u64>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<AgentTask>>;

    async fn list_by_status(&self, status: TaskStatus, limit: usize) -> DomainResult<Vec<AgentTask>>;

    async fn list_for_stage(&self, stage_id: Uuid) -> DomainResult<Vec<AgentTask>>;

    async fn list_for_project(&self, project_id: Uuid) -> DomainResult<Vec<AgentTask>>;

    /// Task counts per stage for one workflow of one project.
    async fn stage_counts(&self, project_id: Uuid, workflow_id: Uuid) -> DomainResult<HashMap<Uuid, TaskCounts>>;

    /// Claim a pending task for an agent: CAS `pending -> assigned`, set
    /// the agent id and `dispatched_at`. Exactly one concurrent caller
    /// wins; the rest observe `false`.
    async fn assign(&self, id: Uuid, agent_id: &str) -> DomainResult<bool>;

    /// Transport-failure revert: CAS `assigned -> pending`, clear the
    /// agent id and `dispatched_at`, bump the retry counter.
    async fn revert_assignment(&self, id: Uuid) -> DomainResult<bool>;

    /// Generic CAS transition keyed on the expected current status.
    async fn transition(&self, id: Uuid, from: TaskStatus, to: TaskStatus) -> DomainResult<bool>;

    /// CAS into `failed` with a reason.
    async fn fail(&self, id: Uuid, from: TaskStatus, reason: &str) -> DomainResult<bool>;

    /// Agents that produced tasks of the given statuses for a stage; used
    /// by the `previous_stage` source to trust only completed agents.
    async fn agent_ids_for_stage(&self, stage_id: Uuid, statuses: &[TaskStatus]) -> DomainResult<Vec<String>>;

    /// Dispatched or running tasks whose deadline passed at `now`.
    async fn list_timed_out(&self, now: DateTime<Utc>) -> DomainResult<Vec<AgentTask>>;

    /// Pending tasks created before `cutoff`; flagged as stuck for the
    /// operator, never auto-failed.
    async fn list_stuck_pending(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<AgentTask>>;
}
