//! Task dispatch.
//!
//! The dispatcher runs the pre-dispatch policy gate, selects an agent, and
//! delivers the task envelope. Claiming is a compare-and-set on the task
//! status, so concurrent schedulers dispatch each task at most once; a
//! transport failure reverts the claim and the task is retried next tick.

use std::num::NonZeroU32;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentTask, TaskEnvelope, TaskStatus};
use crate::domain::ports::{AgentChannel, AgentRegistry, TaskRepository};

use super::allocator::ResourceAllocator;
use super::policy_enforcer::{EnforcementOutcome, PolicyEnforcer};

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered to an agent.
    Dispatched,
    /// Policy violation; the task was failed with the reason.
    Violated,
    /// No eligible agent; the task stays pending for the next tick.
    NoAgent,
    /// Transient error (including losing the claim race); the task is left
    /// in a coherent state and retried next tick.
    Error,
}

/// Counters for one dispatch batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub violated: u64,
    pub no_agent: u64,
    pub errors: u64,
}

impl DispatchStats {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Dispatched => self.dispatched += 1,
            DispatchOutcome::Violated => self.violated += 1,
            DispatchOutcome::NoAgent => self.no_agent += 1,
            DispatchOutcome::Error => self.errors += 1,
        }
    }
}

pub struct TaskDispatcher {
    enforcer: Arc<PolicyEnforcer>,
    allocator: Arc<ResourceAllocator>,
    agents: Arc<dyn AgentRegistry>,
    tasks: Arc<dyn TaskRepository>,
    channel: Arc<dyn AgentChannel>,
    limiter: Option<DefaultDirectRateLimiter>,
    concurrency: usize,
}

impl TaskDispatcher {
    pub fn new(
        enforcer: Arc<PolicyEnforcer>,
        allocator: Arc<ResourceAllocator>,
        agents: Arc<dyn AgentRegistry>,
        tasks: Arc<dyn TaskRepository>,
        channel: Arc<dyn AgentChannel>,
    ) -> Self {
        Self {
            enforcer,
            allocator,
            agents,
            tasks,
            channel,
            limiter: None,
            concurrency: 16,
        }
    }

    /// Cap outbound deliveries per second across all agents.
    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.limiter = NonZeroU32::new(per_second).map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Dispatch one pending task.
    pub async fn dispatch(&self, task: &AgentTask) -> DomainResult<DispatchOutcome> {
        // 1. Policy gate. A violation fails the task; a check error leaves
        // it pending for retry.
        match self.enforcer.enforce(task).await {
            Ok(EnforcementOutcome::Ok) => {}
            Ok(EnforcementOutcome::Violation { reason }) => {
                info!(task_id = %task.id, target = %task.target_value, reason = %reason, "policy violation, failing task");
                if !self.tasks.fail(task.id, TaskStatus::Pending, &reason).await? {
                    debug!(task_id = %task.id, "task left pending state before violation could be recorded");
                }
                return Ok(DispatchOutcome::Violated);
            }
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "policy check error, leaving task pending");
                return Ok(DispatchOutcome::Error);
            }
        }

        // 2/3. Candidates and selection.
        let candidates = match self.agents.list_online().await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "agent lookup failed");
                return Ok(DispatchOutcome::Error);
            }
        };
        let Some(agent) = self.allocator.select_agent(&candidates, task).await else {
            debug!(task_id = %task.id, tool = %task.tool_name, "no eligible agent, leaving task pending");
            return Ok(DispatchOutcome::NoAgent);
        };

        // 4. Claim: CAS pending -> assigned. Exactly one concurrent
        // dispatcher wins; losers treat the attempt as a no-op.
        if !self.tasks.assign(task.id, &agent.agent_id).await? {
            debug!(task_id = %task.id, "task already claimed by a concurrent dispatcher");
            return Ok(DispatchOutcome::Error);
        }
        if let Err(err) = self.agents.adjust_load(&agent.agent_id, 1).await {
            warn!(agent_id = %agent.agent_id, error = %err, "failed to bump agent load counter");
        }

        // 5. Deliver.
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        let envelope = envelope_for(task);
        if let Err(err) = self.channel.send_task(&agent.agent_id, &envelope).await {
            warn!(task_id = %task.id, agent_id = %agent.agent_id, error = %err, "task delivery failed, reverting claim");
            if !self.tasks.revert_assignment(task.id).await? {
                warn!(task_id = %task.id, "could not revert assignment after delivery failure");
            }
            if let Err(err) = self.agents.adjust_load(&agent.agent_id, -1).await {
                warn!(agent_id = %agent.agent_id, error = %err, "failed to drop agent load counter");
            }
            return Ok(DispatchOutcome::Error);
        }

        // 6. Confirm.
        if !self.tasks.transition(task.id, TaskStatus::Assigned, TaskStatus::Dispatched).await? {
            warn!(task_id = %task.id, "task left assigned state before dispatch confirmation");
        }
        info!(task_id = %task.id, agent_id = %agent.agent_id, tool = %task.tool_name, target = %task.target_value, "task dispatched");
        Ok(DispatchOutcome::Dispatched)
    }

    /// Dispatch a batch concurrently; deliveries to different agents run in
    /// parallel up to the configured concurrency.
    pub async fn dispatch_batch(&self, tasks: Vec<AgentTask>) -> DispatchStats {
        let outcomes = stream::iter(tasks)
            .map(|task| async move {
                match self.dispatch(&task).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        warn!(task_id = %task.id, error = %err, "dispatch error");
                        DispatchOutcome::Error
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut stats = DispatchStats::default();
        for outcome in outcomes {
            stats.record(outcome);
        }
        stats
    }
}

fn envelope_for(task: &AgentTask) -> TaskEnvelope {
    TaskEnvelope {
        task_id: task.id,
        project_id: task.project_id,
        workflow_id: task.workflow_id,
        stage_id: task.stage_id,
        tool_name: task.tool_name.clone(),
        tool_params: task.tool_params.clone(),
        input_target: task.input_target.clone(),
        policy_snapshot: task.policy_snapshot.clone(),
        timeout_seconds: task.timeout_secs,
    }
}
