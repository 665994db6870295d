//! Project repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Project, ProjectStatus};

/// Repository interface for project persistence.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn create(&self, project: &Project) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Project>>;

    async fn list_by_status(&self, status: ProjectStatus) -> DomainResult<Vec<Project>>;

    /// Compare-and-set status transition. Returns false when the project is
    /// no longer in `from` (a concurrent actor moved it).
    async fn update_status(&self, id: Uuid, from: ProjectStatus, to: ProjectStatus) -> DomainResult<bool>;

    /// Transition a project to `failed` with a short operator-visible reason.
    async fn set_failed(&self, id: Uuid, reason: &str) -> DomainResult<()>;

    /// Replace the project scope. Refused once any task of the project has
    /// been dispatched: scope is immutable after first dispatch.
    async fn update_scope(&self, id: Uuid, scope: &[String]) -> DomainResult<()>;

    /// Replace the project's environment tags.
    async fn update_tags(&self, id: Uuid, tags: &[String]) -> DomainResult<()>;
}
