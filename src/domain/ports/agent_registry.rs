//! Agent registry port.
//!
//! The kernel reads agents; registration and heartbeating happen on an
//! external surface. The one write the kernel performs is the best-effort
//! load counter around dispatch.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Agent;

/// Read-mostly view of the agent fleet.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn get(&self, agent_id: &str) -> DomainResult<Option<Agent>>;

    async fn list_online(&self) -> DomainResult<Vec<Agent>>;

    /// Best-effort pending-task counter adjustment; failures are logged by
    /// callers and never fail a dispatch.
    async fn adjust_load(&self, agent_id: &str, delta: i64) -> DomainResult<()>;

    /// Registration/heartbeat write-through (external surface, tests).
    async fn upsert(&self, agent: &Agent) -> DomainResult<()>;
}
