//! Tag service port.
//!
//! Agent capability tags live in an external tagging system. The allocator
//! resolves them in two hops (entity -> tag ids -> tags) and degrades to an
//! empty set when the service is unreachable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;

/// A resolved tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

/// External tag lookup interface.
#[async_trait]
pub trait TagService: Send + Sync {
    /// Tag ids attached to an entity (e.g. `("agent", "agent-7")`).
    async fn entity_tag_ids(&self, entity_type: &str, entity_id: &str) -> DomainResult<Vec<String>>;

    /// Resolve tag ids to tags.
    async fn tags_by_ids(&self, ids: &[String]) -> DomainResult<Vec<Tag>>;
}

/// Tag service that knows no tags. Used when no tagging system is wired up
/// and as the degraded-mode stand-in in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTagService;

#[async_trait]
impl TagService for NullTagService {
    async fn entity_tag_ids(&self, _entity_type: &str, _entity_id: &str) -> DomainResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn tags_by_ids(&self, _ids: &[String]) -> DomainResult<Vec<Tag>> {
        Ok(Vec::new())
    }
}
