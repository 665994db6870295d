//! Project-target source: wraps the project scope seeds.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Target, TargetSource, TargetType};

use super::{ProvideContext, SourceProvider};

/// Emits one target per project-scope seed entry.
pub struct ProjectTargetProvider;

#[async_trait]
impl SourceProvider for ProjectTargetProvider {
    fn name(&self) -> &'static str {
        "project_target"
    }

    async fn provide(&self, _ctx: &ProvideContext, source: &TargetSource, seeds: &[String]) -> DomainResult<Vec<Target>> {
        let target_type = TargetType::parse_or_unknown(&source.target_type);
        Ok(seeds
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|seed| Target::new(target_type, seed.trim(), "project_target"))
            .collect())
    }
}
