//! Agent task domain model.
//!
//! A task is one concrete dispatchable unit: a stage applied to a single
//! target. Only the orchestrator transitions task status, and persisted
//! transitions are compare-and-set against the current status so that at
//! most one concurrent dispatcher ever claims a pending task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::policy::PolicySnapshot;
use super::target::Target;

/// Status of a task in the dispatch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting for an eligible agent.
    Pending,
    /// Claimed by the dispatcher, not yet delivered.
    Assigned,
    /// Delivered to the agent.
    Dispatched,
    /// Agent reported execution start.
    Running,
    /// Agent reported success.
    Finished,
    /// Policy violation, agent failure, or timeout.
    Failed,
    /// Withdrawn before dispatch.
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Dispatched => "dispatched",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "dispatched" => Some(Self::Dispatched),
            "running" => Some(Self::Running),
            "finished" => Some(Self::Finished),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this status.
    ///
    /// `Assigned -> Pending` is the transport-failure revert: the task was
    /// claimed but delivery failed, so it returns to the queue.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Assigned, Self::Failed, Self::Cancelled],
            Self::Assigned => &[Self::Dispatched, Self::Pending],
            Self::Dispatched => &[Self::Running, Self::Finished, Self::Failed],
            Self::Running => &[Self::Finished, Self::Failed],
            Self::Finished => &[],
            Self::Failed => &[],
            Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// One dispatched unit of scan work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: Uuid,
    pub project_id: Uuid,
    pub workflow_id: Uuid,
    pub stage_id: Uuid,
    /// Agent identifier, set when the task is claimed.
    pub agent_id: Option<String>,
    /// Serialized [`Target`] this task scans.
    pub input_target: String,
    /// The bare target value, used for idempotent materialization.
    pub target_value: String,
    pub tool_name: String,
    pub tool_params: serde_json::Value,
    pub required_tags: Vec<String>,
    pub status: TaskStatus,
    pub retry_count: u32,
    /// Frozen copy of project scope and stage policy; never re-read from
    /// the live project row.
    pub policy_snapshot: PolicySnapshot,
    /// Wall-clock budget, tracked from `dispatched_at`.
    pub timeout_secs: u64,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AgentTask {
    /// Materialize a task from a stage and one resolved target.
    pub fn for_target(
        project_id: Uuid,
        workflow_id: Uuid,
        stage_id: Uuid,
        target: &Target,
        tool_name: impl Into<String>,
        snapshot: PolicySnapshot,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            workflow_id,
            stage_id,
            agent_id: None,
            input_target: serde_json::to_string(target).unwrap_or_else(|_| target.value.clone()),
            target_value: target.value.clone(),
            tool_name: tool_name.into(),
            tool_params: serde_json::Value::Null,
            required_tags: Vec::new(),
            status: TaskStatus::default(),
            retry_count: 0,
            policy_snapshot: snapshot,
            timeout_secs: 3600,
            failure_reason: None,
            created_at: Utc::now(),
            dispatched_at: None,
            finished_at: None,
        }
    }

    pub fn with_tool_params(mut self, params: serde_json::Value) -> Self {
        self.tool_params = params;
        self
    }

    pub fn with_required_tags(mut self, tags: Vec<String>) -> Self {
        self.required_tags = tags;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// The instant a dispatched task exceeds its budget.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.dispatched_at
            .map(|d| d + chrono::Duration::seconds(self.timeout_secs.min(i64::MAX as u64) as i64))
    }
}
