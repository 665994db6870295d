//! API target source placeholder.
//!
//! Pulling targets from external asset APIs is not implemented yet; the
//! provider exists so policies declaring it parse and resolve cleanly.

use async_trait::async_trait;
use tracing::warn;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Target, TargetSource};

use super::{ProvideContext, SourceProvider};

pub struct ApiProvider;

#[async_trait]
impl SourceProvider for ApiProvider {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn provide(&self, ctx: &ProvideContext, source: &TargetSource, _seeds: &[String]) -> DomainResult<Vec<Target>> {
        warn!(
            stage_id = %ctx.stage_id,
            source_value = %source.source_value,
            "api target source is not implemented; returning no targets"
        );
        Ok(Vec::new())
    }
}
