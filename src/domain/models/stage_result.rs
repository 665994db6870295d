//! Stage results and wire envelopes.
//!
//! `StageResult` is the persisted record an agent's findings become; the
//! `previous_stage` target source reads them back. `TaskEnvelope` and
//! `ResultEnvelope` are the two payloads crossing the master/agent boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::policy::PolicySnapshot;

/// One result record emitted by an agent for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub id: Uuid,
    pub project_id: Uuid,
    pub workflow_id: Uuid,
    pub stage_id: Uuid,
    pub agent_id: String,
    /// Result class, e.g. "port", "vuln", "host".
    pub result_type: String,
    pub target_type: String,
    pub target_value: String,
    /// Tool-specific payload; `previous_stage` unwind walks into this.
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl StageResult {
    pub fn new(
        project_id: Uuid,
        workflow_id: Uuid,
        stage_id: Uuid,
        agent_id: impl Into<String>,
        target_value: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            workflow_id,
            stage_id,
            agent_id: agent_id.into(),
            result_type: String::new(),
            target_type: String::new(),
            target_value: target_value.into(),
            attributes: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_result_type(mut self, result_type: impl Into<String>) -> Self {
        self.result_type = result_type.into();
        self
    }

    pub fn with_target_type(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = target_type.into();
        self
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }
}

/// The dispatch payload delivered to an agent.
///
/// Carries the policy snapshot read-only so agents can audit why they were
/// asked to scan a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub workflow_id: Uuid,
    pub stage_id: Uuid,
    pub tool_name: String,
    pub tool_params: serde_json::Value,
    /// Serialized target JSON.
    pub input_target: String,
    pub policy_snapshot: PolicySnapshot,
    pub timeout_seconds: u64,
}

/// Execution state reported by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Running,
    Finished,
    Failed,
}

impl ReportedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

/// One finding inside a result envelope; becomes a [`StageResult`] row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default)]
    pub result_type: String,
    #[serde(default)]
    pub target_type: String,
    #[serde(default)]
    pub target_value: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// The result payload an agent sends back to the master.
///
/// Unknown fields are tolerated for forward compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub task_id: Uuid,
    pub status: ReportedStatus,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub output_files: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

impl ResultEnvelope {
    pub fn running(task_id: Uuid) -> Self {
        Self::with_status(task_id, ReportedStatus::Running)
    }

    pub fn finished(task_id: Uuid) -> Self {
        Self::with_status(task_id, ReportedStatus::Finished)
    }

    pub fn failed(task_id: Uuid, error_message: impl Into<String>) -> Self {
        let mut env = Self::with_status(task_id, ReportedStatus::Failed);
        env.error_message = Some(error_message.into());
        env
    }

    fn with_status(task_id: Uuid, status: ReportedStatus) -> Self {
        Self {
            task_id,
            status,
            stdout: None,
            stderr: None,
            exit_code: None,
            error_message: None,
            output_files: Vec::new(),
            metadata: serde_json::Value::Null,
            findings: Vec::new(),
        }
    }

    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.findings.push(finding);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_envelope_tolerates_sparse_payload() {
        let env: ResultEnvelope = serde_json::from_value(json!({
            "task_id": Uuid::new_v4(),
            "status": "finished",
            "a_future_field": true
        }))
        .unwrap();
        assert_eq!(env.status, ReportedStatus::Finished);
        assert!(env.findings.is_empty());
        assert!(env.exit_code.is_none());
    }

    #[test]
    fn test_finding_defaults() {
        let f: Finding = serde_json::from_value(json!({"target_value": "10.0.0.5"})).unwrap();
        assert_eq!(f.target_value, "10.0.0.5");
        assert!(f.result_type.is_empty());
    }
}
