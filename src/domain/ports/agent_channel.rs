//! Agent transport port.
//!
//! Delivery is at-least-once: a send may succeed on the wire after the
//! caller saw an error, so agents deduplicate by `task_id`.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::TaskEnvelope;

/// Outbound channel to the agent fleet.
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Deliver a task envelope to one agent. An error leaves the task
    /// eligible for re-dispatch.
    async fn send_task(&self, agent_id: &str, envelope: &TaskEnvelope) -> DomainResult<()>;
}
