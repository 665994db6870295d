//! Workflow and scan-stage domain models.
//!
//! A workflow is an ordered or DAG-structured collection of scan stages
//! attached to a project. `StageDag` holds the pure readiness logic the
//! scheduler evaluates each tick: which stages can be materialized now,
//! and whether the workflow has settled.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

use super::policy::TargetPolicy;

/// How a workflow's stages are sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Stages run one at a time in `stage_order`.
    Sequential,
    /// Stages run as soon as their predecessors settle.
    Dag,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Sequential
    }
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Dag => "dag",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sequential" | "seq" => Some(Self::Sequential),
            "dag" => Some(Self::Dag),
            _ => None,
        }
    }
}

/// An ordered collection of scan stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub execution_mode: ExecutionMode,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(project_id: Uuid, name: impl Into<String>, execution_mode: ExecutionMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            name: name.into(),
            execution_mode,
            created_at: Utc::now(),
        }
    }
}

/// One configured scan step within a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanStage {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,
    /// Position for sequential mode; lower runs first.
    pub stage_order: i64,
    /// Stages of the same workflow that must settle first (DAG mode).
    pub predecessors: Vec<Uuid>,
    /// External tool the agents will run (e.g. "nmap").
    pub tool_name: String,
    /// Tool-specific parameters, passed through to the agent untouched.
    pub tool_config: serde_json::Value,
    pub target_policy: TargetPolicy,
    /// Tags an agent must carry to receive this stage's tasks.
    pub required_tags: Vec<String>,
    /// Per-task wall-clock budget, tracked from dispatch.
    pub timeout_secs: u64,
    pub retry_max: u32,
    pub created_at: DateTime<Utc>,
}

impl ScanStage {
    pub fn new(workflow_id: Uuid, name: impl Into<String>, stage_order: i64, tool_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            name: name.into(),
            stage_order,
            predecessors: Vec::new(),
            tool_name: tool_name.into(),
            tool_config: serde_json::Value::Null,
            target_policy: TargetPolicy::default(),
            required_tags: Vec::new(),
            timeout_secs: 3600,
            retry_max: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_predecessors(mut self, predecessors: Vec<Uuid>) -> Self {
        self.predecessors = predecessors;
        self
    }

    pub fn with_policy(mut self, policy: TargetPolicy) -> Self {
        self.target_policy = policy;
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
}

/// Per-stage task bookkeeping the scheduler feeds into readiness checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSummary {
    /// Whether the stage has been materialized into tasks (a stage-run
    /// record exists), even if it produced zero tasks.
    pub materialized: bool,
    pub total_tasks: u64,
    /// Tasks not yet in a terminal status.
    pub unfinished_tasks: u64,
    pub failed_tasks: u64,
}

impl StageSummary {
    /// The stage ran and every task reached a terminal status.
    pub fn is_settled(&self) -> bool {
        self.materialized && self.unfinished_tasks == 0
    }
}

/// The predecessor graph of one workflow's stages.
///
/// Represented as id -> predecessor indices, never as a pointer graph.
#[derive(Debug, Clone)]
pub struct StageDag {
    workflow_id: Uuid,
    /// Stages sorted by (stage_order, id) for deterministic iteration.
    order: Vec<Uuid>,
    predecessors: HashMap<Uuid, Vec<Uuid>>,
}

impl StageDag {
    pub fn new(workflow_id: Uuid, stages: &[ScanStage]) -> Self {
        let mut sorted: Vec<&ScanStage> = stages.iter().collect();
        sorted.sort_by(|a, b| a.stage_order.cmp(&b.stage_order).then(a.id.cmp(&b.id)));

        Self {
            workflow_id,
            order: sorted.iter().map(|s| s.id).collect(),
            predecessors: stages.iter().map(|s| (s.id, s.predecessors.clone())).collect(),
        }
    }

    pub fn stage_ids(&self) -> &[Uuid] {
        &self.order
    }

    /// Reject graphs with predecessors outside the workflow or with cycles.
    pub fn validate(&self) -> DomainResult<()> {
        for (stage, preds) in &self.predecessors {
            for pred in preds {
                if pred == stage {
                    return Err(DomainError::DependencyCycle(self.workflow_id));
                }
                if !self.predecessors.contains_key(pred) {
                    return Err(DomainError::ValidationFailed(format!(
                        "stage {stage} references predecessor {pred} outside its workflow"
                    )));
                }
            }
        }
        if self.has_cycle() {
            return Err(DomainError::DependencyCycle(self.workflow_id));
        }
        Ok(())
    }

    pub fn has_cycle(&self) -> bool {
        let mut visited = HashSet::new();
        let mut in_stack = HashSet::new();
        self.order
            .iter()
            .any(|&id| self.cycle_dfs(id, &mut visited, &mut in_stack))
    }

    fn cycle_dfs(&self, id: Uuid, visited: &mut HashSet<Uuid>, in_stack: &mut HashSet<Uuid>) -> bool {
        if in_stack.contains(&id) {
            return true;
        }
        if !visited.insert(id) {
            return false;
        }
        in_stack.insert(id);
        if let Some(preds) = self.predecessors.get(&id) {
            for &pred in preds {
                // Foreign predecessors are a validation error, not a cycle.
                if self.predecessors.contains_key(&pred) && self.cycle_dfs(pred, visited, in_stack) {
                    return true;
                }
            }
        }
        in_stack.remove(&id);
        false
    }

    /// Stages that may be materialized now.
    ///
    /// Sequential mode yields at most one stage: the lowest-order
    /// unmaterialized stage whose every lower-order stage has settled
    /// (failures do not block progression). DAG mode yields every
    /// unmaterialized stage whose predecessors all settled without a single
    /// failed task; a failed predecessor blocks its successors permanently.
    pub fn ready_stages(&self, mode: ExecutionMode, summaries: &HashMap<Uuid, StageSummary>) -> Vec<Uuid> {
        match mode {
            ExecutionMode::Sequential => self.ready_sequential(summaries).into_iter().collect(),
            ExecutionMode::Dag => self.ready_dag(summaries),
        }
    }

    fn ready_sequential(&self, summaries: &HashMap<Uuid, StageSummary>) -> Option<Uuid> {
        for (i, &id) in self.order.iter().enumerate() {
            let summary = summaries.get(&id).copied().unwrap_or_default();
            if summary.materialized {
                continue;
            }
            let priors_settled = self.order[..i]
                .iter()
                .all(|prior| summaries.get(prior).copied().unwrap_or_default().is_settled());
            return priors_settled.then_some(id);
        }
        None
    }

    fn ready_dag(&self, summaries: &HashMap<Uuid, StageSummary>) -> Vec<Uuid> {
        self.order
            .iter()
            .filter(|&&id| {
                let summary = summaries.get(&id).copied().unwrap_or_default();
                if summary.materialized {
                    return false;
                }
                self.predecessors
                    .get(&id)
                    .map(|preds| {
                        preds.iter().all(|pred| {
                            let p = summaries.get(pred).copied().unwrap_or_default();
                            p.is_settled() && p.failed_tasks == 0
                        })
                    })
                    .unwrap_or(true)
            })
            .copied()
            .collect()
    }

    /// A workflow has settled when every task is terminal and no stage can
    /// become ready anymore. Stages blocked by failed DAG predecessors are
    /// simply never materialized; they do not keep the workflow open.
    pub fn is_settled(&self, mode: ExecutionMode, summaries: &HashMap<Uuid, StageSummary>) -> bool {
        let all_tasks_terminal = self
            .order
            .iter()
            .all(|id| summaries.get(id).copied().unwrap_or_default().unfinished_tasks == 0);
        all_tasks_terminal && self.ready_stages(mode, summaries).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(workflow_id: Uuid, name: &str, order: i64, preds: Vec<Uuid>) -> ScanStage {
        ScanStage::new(workflow_id, name, order, "nmap").with_predecessors(preds)
    }

    fn summary(materialized: bool, total: u64, unfinished: u64, failed: u64) -> StageSummary {
        StageSummary {
            materialized,
            total_tasks: total,
            unfinished_tasks: unfinished,
            failed_tasks: failed,
        }
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let wf = Uuid::new_v4();
        let mut a = stage(wf, "a", 1, vec![]);
        let mut b = stage(wf, "b", 2, vec![]);
        let c_id = Uuid::new_v4();
        let mut c = stage(wf, "c", 3, vec![]);
        c.id = c_id;
        a.predecessors = vec![c_id];
        b.predecessors = vec![a.id];
        c.predecessors = vec![b.id];

        let dag = StageDag::new(wf, &[a, b, c]);
        assert!(dag.has_cycle());
        assert!(matches!(dag.validate(), Err(DomainError::DependencyCycle(_))));
    }

    #[test]
    fn test_validate_rejects_foreign_predecessor() {
        let wf = Uuid::new_v4();
        let a = stage(wf, "a", 1, vec![Uuid::new_v4()]);
        let dag = StageDag::new(wf, &[a]);
        assert!(matches!(dag.validate(), Err(DomainError::ValidationFailed(_))));
    }

    #[test]
    fn test_validate_rejects_self_reference() {
        let wf = Uuid::new_v4();
        let mut a = stage(wf, "a", 1, vec![]);
        a.predecessors = vec![a.id];
        let dag = StageDag::new(wf, &[a]);
        assert!(matches!(dag.validate(), Err(DomainError::DependencyCycle(_))));
    }

    #[test]
    fn test_sequential_one_ready_stage_at_a_time() {
        let wf = Uuid::new_v4();
        let a = stage(wf, "a", 1, vec![]);
        let b = stage(wf, "b", 2, vec![]);
        let (a_id, b_id) = (a.id, b.id);
        let dag = StageDag::new(wf, &[b, a]);

        // Nothing materialized: only the lowest order stage is ready.
        let mut summaries = HashMap::new();
        assert_eq!(dag.ready_stages(ExecutionMode::Sequential, &summaries), vec![a_id]);

        // A materialized but still running: nothing is ready.
        summaries.insert(a_id, summary(true, 3, 1, 0));
        assert!(dag.ready_stages(ExecutionMode::Sequential, &summaries).is_empty());

        // A settled (with a failure): B becomes ready; failures do not gate
        // sequential progression.
        summaries.insert(a_id, summary(true, 3, 0, 1));
        assert_eq!(dag.ready_stages(ExecutionMode::Sequential, &summaries), vec![b_id]);

        // Everything settled: workflow settles.
        summaries.insert(b_id, summary(true, 1, 0, 0));
        assert!(dag.is_settled(ExecutionMode::Sequential, &summaries));
    }

    #[test]
    fn test_dag_diamond_readiness() {
        let wf = Uuid::new_v4();
        let a = stage(wf, "a", 1, vec![]);
        let b = stage(wf, "b", 2, vec![a.id]);
        let c = stage(wf, "c", 3, vec![a.id]);
        let d = stage(wf, "d", 4, vec![b.id, c.id]);
        let (a_id, b_id, c_id, d_id) = (a.id, b.id, c.id, d.id);
        let dag = StageDag::new(wf, &[a, b, c, d]);

        let mut summaries = HashMap::new();
        assert_eq!(dag.ready_stages(ExecutionMode::Dag, &summaries), vec![a_id]);

        // A settled: B and C both ready concurrently.
        summaries.insert(a_id, summary(true, 1, 0, 0));
        let ready = dag.ready_stages(ExecutionMode::Dag, &summaries);
        assert_eq!(ready.len(), 2);
        assert!(ready.contains(&b_id) && ready.contains(&c_id));

        // B settled, C still running: D is not ready.
        summaries.insert(b_id, summary(true, 1, 0, 0));
        summaries.insert(c_id, summary(true, 1, 1, 0));
        assert!(dag.ready_stages(ExecutionMode::Dag, &summaries).is_empty());
        assert!(!dag.is_settled(ExecutionMode::Dag, &summaries));

        // C settled: D ready.
        summaries.insert(c_id, summary(true, 1, 0, 0));
        assert_eq!(dag.ready_stages(ExecutionMode::Dag, &summaries), vec![d_id]);
    }

    #[test]
    fn test_dag_failed_predecessor_blocks_and_workflow_settles() {
        let wf = Uuid::new_v4();
        let a = stage(wf, "a", 1, vec![]);
        let b = stage(wf, "b", 2, vec![a.id]);
        let (a_id, b_id) = (a.id, b.id);
        let dag = StageDag::new(wf, &[a, b]);

        let mut summaries = HashMap::new();
        summaries.insert(a_id, summary(true, 2, 0, 1));

        // B never becomes ready, and the workflow counts as settled.
        assert!(dag.ready_stages(ExecutionMode::Dag, &summaries).is_empty());
        assert!(dag.is_settled(ExecutionMode::Dag, &summaries));
        assert!(!summaries.contains_key(&b_id));
    }

    #[test]
    fn test_zero_task_stage_settles() {
        let wf = Uuid::new_v4();
        let a = stage(wf, "a", 1, vec![]);
        let b = stage(wf, "b", 2, vec![a.id]);
        let (a_id, b_id) = (a.id, b.id);
        let dag = StageDag::new(wf, &[a, b]);

        // A materialized with zero targets still unblocks B.
        let mut summaries = HashMap::new();
        summaries.insert(a_id, summary(true, 0, 0, 0));
        assert_eq!(dag.ready_stages(ExecutionMode::Dag, &summaries), vec![b_id]);
    }
}
