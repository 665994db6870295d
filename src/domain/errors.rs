//! Domain errors for the Scanforge orchestration kernel.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the Scanforge system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Project not found: {0}")]
    ProjectNotFound(Uuid),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("Stage not found: {0}")]
    StageNotFound(Uuid),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Stage dependency cycle detected in workflow: {0}")]
    DependencyCycle(Uuid),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Policy check error: {0}")]
    PolicyCheck(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Agent transport error: {0}")]
    Transport(String),

    #[error("Ingest queue is full")]
    QueueFull,
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
