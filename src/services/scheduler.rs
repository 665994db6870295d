//! The scheduling control loop.
//!
//! Each tick: discover running projects, find ready stages per workflow,
//! materialize them into tasks (idempotently), dispatch pending tasks,
//! sweep timeouts, and advance project completion. Per-project failures are
//! isolated so one broken project never stalls the fleet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentTask, PolicySnapshot, Project, ProjectStatus, ScanStage, SchedulerConfig, StageDag, StageSummary,
    TaskStatus, Workflow,
};
use crate::domain::ports::{ProjectRepository, TaskRepository, WorkflowRepository};

use super::dispatcher::{DispatchStats, TaskDispatcher};
use super::target_provider::{ProvideContext, TargetProviderService};

/// Counters for one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub projects_processed: u64,
    pub stages_materialized: u64,
    pub tasks_created: u64,
    pub dispatch: DispatchStats,
    pub tasks_timed_out: u64,
    pub projects_finished: u64,
    pub stuck_pending: u64,
}

pub struct Scheduler {
    projects: Arc<dyn ProjectRepository>,
    workflows: Arc<dyn WorkflowRepository>,
    tasks: Arc<dyn TaskRepository>,
    provider: Arc<TargetProviderService>,
    dispatcher: Arc<TaskDispatcher>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        projects: Arc<dyn ProjectRepository>,
        workflows: Arc<dyn WorkflowRepository>,
        tasks: Arc<dyn TaskRepository>,
        provider: Arc<TargetProviderService>,
        dispatcher: Arc<TaskDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            projects,
            workflows,
            tasks,
            provider,
            dispatcher,
            config,
        }
    }

    /// Run the control loop until the shutdown channel fires. In-flight
    /// tick work drains before the loop returns.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.config.tick_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.config.tick_interval_secs, "scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(stats) => {
                            debug!(
                                projects = stats.projects_processed,
                                stages = stats.stages_materialized,
                                created = stats.tasks_created,
                                dispatched = stats.dispatch.dispatched,
                                violated = stats.dispatch.violated,
                                timed_out = stats.tasks_timed_out,
                                finished = stats.projects_finished,
                                "tick complete"
                            );
                        }
                        Err(err) => error!(error = %err, "tick failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }
    }

    /// One full scheduling pass. Public so operational tooling and tests
    /// can drive the scheduler deterministically.
    pub async fn tick(&self) -> DomainResult<TickStats> {
        let mut stats = TickStats::default();

        // 1+2+3. Ready-stage evaluation and materialization, fanned out per
        // project with an isolating deadline.
        let running = self.projects.list_by_status(ProjectStatus::Running).await?;
        let deadline = Duration::from_secs(self.config.project_deadline_secs.max(1));
        let results: Vec<_> = stream::iter(running.iter())
            .map(|project| async move {
                let processed = tokio::time::timeout(deadline, self.process_project(project)).await;
                (project, processed)
            })
            .buffer_unordered(self.config.project_concurrency.max(1))
            .collect()
            .await;

        for (project, outcome) in results {
            stats.projects_processed += 1;
            match outcome {
                Ok(Ok((stages, created))) => {
                    stats.stages_materialized += stages;
                    stats.tasks_created += created;
                }
                Ok(Err(err)) => {
                    error!(project_id = %project.id, error = %err, "project processing failed; other projects proceed");
                }
                Err(_) => {
                    warn!(project_id = %project.id, "project processing exceeded per-project deadline");
                }
            }
        }

        // 4. Dispatch pending tasks.
        let pending = self.tasks.list_by_status(TaskStatus::Pending, self.config.dispatch_batch).await?;
        if !pending.is_empty() {
            stats.dispatch = self.dispatcher.dispatch_batch(pending).await;
        }

        // Timeout sweep: dispatched/running past their budget fail.
        stats.tasks_timed_out = self.sweep_timeouts().await?;

        // Stuck-pending detection: flagged for the operator, never auto-failed.
        stats.stuck_pending = self.report_stuck_pending().await?;

        // 5. Completion: projects whose workflows all settled finish.
        stats.projects_finished = self.finish_settled_projects().await?;

        Ok(stats)
    }

    /// Evaluate one project's workflows and materialize every ready stage.
    async fn process_project(&self, project: &Project) -> DomainResult<(u64, u64)> {
        let mut stages_materialized = 0u64;
        let mut tasks_created = 0u64;

        for workflow in self.workflows.list_for_project(project.id).await? {
            let stages = self.workflows.list_stages(workflow.id).await?;
            if stages.is_empty() {
                continue;
            }

            let dag = StageDag::new(workflow.id, &stages);
            if let Err(err) = dag.validate() {
                let reason = match err {
                    DomainError::DependencyCycle(_) => "workflow DAG has a cycle".to_string(),
                    other => other.to_string(),
                };
                error!(project_id = %project.id, workflow_id = %workflow.id, reason = %reason, "refusing to schedule invalid workflow");
                self.projects.set_failed(project.id, &reason).await?;
                return Ok((stages_materialized, tasks_created));
            }

            let summaries = self.stage_summaries(project.id, &workflow).await?;
            let ready = dag.ready_stages(workflow.execution_mode, &summaries);

            for stage_id in ready {
                let Some(stage) = stages.iter().find(|s| s.id == stage_id) else {
                    continue;
                };
                info!(project_id = %project.id, workflow_id = %workflow.id, stage = %stage.name, "stage ready");
                match self.materialize_stage(project, &workflow, stage).await {
                    Ok(created) => {
                        stages_materialized += 1;
                        tasks_created += created;
                    }
                    Err(err @ DomainError::Configuration(_)) => {
                        error!(project_id = %project.id, stage = %stage.name, error = %err, "stage policy misconfigured");
                        self.projects.set_failed(project.id, &err.to_string()).await?;
                        return Ok((stages_materialized, tasks_created));
                    }
                    Err(err) => {
                        warn!(project_id = %project.id, stage = %stage.name, error = %err, "stage materialization failed, will retry next tick");
                    }
                }
            }
        }

        Ok((stages_materialized, tasks_created))
    }

    /// Expand a ready stage into pending tasks. The stage-run record is the
    /// idempotency barrier: it is written after the (idempotent) task batch
    /// so a crash in between is repaired by the next tick.
    async fn materialize_stage(&self, project: &Project, workflow: &Workflow, stage: &ScanStage) -> DomainResult<u64> {
        let ctx = ProvideContext {
            project_id: project.id,
            workflow_id: workflow.id,
            stage_id: stage.id,
            stage_order: stage.stage_order,
        };
        let targets = self.provider.resolve(&ctx, &stage.target_policy, &project.scope).await?;

        let snapshot = PolicySnapshot {
            scope: project.scope.clone(),
            project_name: project.name.clone(),
            project_tags: project.tags.clone(),
            target_policy: stage.target_policy.clone(),
        };

        let tasks: Vec<AgentTask> = targets
            .iter()
            .map(|target| {
                AgentTask::for_target(project.id, workflow.id, stage.id, target, stage.tool_name.clone(), snapshot.clone())
                    .with_tool_params(stage.tool_config.clone())
                    .with_required_tags(stage.required_tags.clone())
                    .with_timeout_secs(stage.timeout_secs)
            })
            .collect();

        let created = self.tasks.create_batch(&tasks).await?;
        self.workflows.record_stage_run(stage.id, project.id, created).await?;
        info!(
            project_id = %project.id,
            stage = %stage.name,
            targets = targets.len(),
            created,
            "stage materialized"
        );
        Ok(created)
    }

    /// Join task counts with stage-run records into readiness summaries.
    async fn stage_summaries(&self, project_id: Uuid, workflow: &Workflow) -> DomainResult<HashMap<Uuid, StageSummary>> {
        let counts = self.tasks.stage_counts(project_id, workflow.id).await?;
        let materialized = self.workflows.materialized_stages(project_id, workflow.id).await?;

        let mut summaries: HashMap<Uuid, StageSummary> = HashMap::new();
        for stage_id in &materialized {
            summaries.insert(
                *stage_id,
                StageSummary {
                    materialized: true,
                    ..StageSummary::default()
                },
            );
        }
        for (stage_id, count) in counts {
            let entry = summaries.entry(stage_id).or_default();
            entry.total_tasks = count.total;
            entry.unfinished_tasks = count.unfinished;
            entry.failed_tasks = count.failed;
        }
        Ok(summaries)
    }

    async fn sweep_timeouts(&self) -> DomainResult<u64> {
        let mut timed_out = 0u64;
        for task in self.tasks.list_timed_out(Utc::now()).await? {
            if self.tasks.fail(task.id, task.status, "timeout").await? {
                warn!(task_id = %task.id, agent_id = ?task.agent_id, "task timed out");
                timed_out += 1;
            }
        }
        Ok(timed_out)
    }

    async fn report_stuck_pending(&self) -> DomainResult<u64> {
        let horizon = self.config.tick_interval_secs.saturating_mul(u64::from(self.config.stuck_after_ticks));
        if horizon == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now() - chrono::Duration::seconds(horizon.min(i64::MAX as u64) as i64);
        let stuck = self.tasks.list_stuck_pending(cutoff).await?;
        if !stuck.is_empty() {
            warn!(
                count = stuck.len(),
                first_task = %stuck[0].id,
                "pending tasks have not dispatched for many ticks; operator attention needed"
            );
        }
        Ok(stuck.len() as u64)
    }

    async fn finish_settled_projects(&self) -> DomainResult<u64> {
        let mut finished = 0u64;
        for project in self.projects.list_by_status(ProjectStatus::Running).await? {
            if !self.project_settled(&project).await? {
                continue;
            }
            if self
                .projects
                .update_status(project.id, ProjectStatus::Running, ProjectStatus::Finished)
                .await?
            {
                info!(project_id = %project.id, name = %project.name, "project finished");
                finished += 1;
            }
        }
        Ok(finished)
    }

    /// A project settles when every workflow settles: all tasks terminal
    /// and no stage can become ready anymore.
    async fn project_settled(&self, project: &Project) -> DomainResult<bool> {
        for workflow in self.workflows.list_for_project(project.id).await? {
            let stages = self.workflows.list_stages(workflow.id).await?;
            if stages.is_empty() {
                continue;
            }
            let dag = StageDag::new(workflow.id, &stages);
            if dag.has_cycle() {
                // Handled by the processing phase; never "finished".
                return Ok(false);
            }
            let summaries = self.stage_summaries(project.id, &workflow).await?;
            if !dag.is_settled(workflow.execution_mode, &summaries) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
