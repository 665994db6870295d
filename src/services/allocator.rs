//! Agent selection.
//!
//! `can_execute` gates on liveness, tool support, and required tags;
//! `select_agent` picks the least-loaded eligible agent. Tool names are
//! matched case-insensitively; tags are matched case-sensitively, a known
//! limitation kept for compatibility with existing tag data.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::models::{Agent, AgentStatus, AgentTask};
use crate::domain::ports::TagService;

pub struct ResourceAllocator {
    tags: Arc<dyn TagService>,
}

impl ResourceAllocator {
    pub fn new(tags: Arc<dyn TagService>) -> Self {
        Self { tags }
    }

    /// Whether one agent is eligible for one task.
    pub async fn can_execute(&self, agent: &Agent, task: &AgentTask) -> bool {
        if agent.status != AgentStatus::Online {
            return false;
        }
        if !agent.supports_tool(&task.tool_name) {
            return false;
        }
        if task.required_tags.is_empty() {
            return true;
        }

        let effective = self.effective_tags(agent).await;
        task.required_tags.iter().all(|tag| effective.contains(tag))
    }

    /// Pick the least-loaded eligible agent; ties break on agent id so the
    /// choice is deterministic.
    pub async fn select_agent(&self, candidates: &[Agent], task: &AgentTask) -> Option<Agent> {
        let mut eligible = Vec::new();
        for agent in candidates {
            if self.can_execute(agent, task).await {
                eligible.push(agent.clone());
            }
        }

        eligible
            .into_iter()
            .min_by(|a, b| a.current_load.cmp(&b.current_load).then_with(|| a.agent_id.cmp(&b.agent_id)))
            .map(|agent| {
                debug!(task_id = %task.id, agent_id = %agent.agent_id, load = agent.current_load, "agent selected");
                agent
            })
    }

    /// The agent's own tags plus whatever the external tag service knows.
    /// Tag-service failures degrade to the agent's own tags.
    async fn effective_tags(&self, agent: &Agent) -> HashSet<String> {
        let mut tags: HashSet<String> = agent.tags.iter().cloned().collect();

        match self.tags.entity_tag_ids("agent", &agent.agent_id).await {
            Ok(ids) if !ids.is_empty() => match self.tags.tags_by_ids(&ids).await {
                Ok(resolved) => tags.extend(resolved.into_iter().map(|t| t.name)),
                Err(err) => {
                    warn!(agent_id = %agent.agent_id, error = %err, "tag resolution failed, using agent's own tags");
                }
            },
            Ok(_) => {}
            Err(err) => {
                warn!(agent_id = %agent.agent_id, error = %err, "tag lookup failed, using agent's own tags");
            }
        }

        tags
    }
}
