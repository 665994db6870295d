//! Target resolution: expanding a stage's declarative target policy into
//! concrete targets.
//!
//! Each `source_type` maps to a registered [`SourceProvider`]. Providers
//! are dumb adapters: they turn one source declaration into targets and do
//! no validation of target format. The resolve pipeline concatenates
//! provider output, deduplicates by value, subtracts the stage whitelist,
//! and applies the skip rule.

pub mod api;
pub mod database;
pub mod file;
pub mod manual;
pub mod previous_stage;
pub mod project_target;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Target, TargetPolicy, TargetSource};

pub use api::ApiProvider;
pub use database::DatabaseProvider;
pub use file::FileProvider;
pub use manual::ManualProvider;
pub use previous_stage::PreviousStageProvider;
pub use project_target::ProjectTargetProvider;

/// Stage coordinates a provider may need (the `previous_stage` source reads
/// sibling stages and their results).
#[derive(Debug, Clone, Copy)]
pub struct ProvideContext {
    pub project_id: Uuid,
    pub workflow_id: Uuid,
    pub stage_id: Uuid,
    pub stage_order: i64,
}

/// A pluggable adapter turning one source declaration into targets.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn provide(&self, ctx: &ProvideContext, source: &TargetSource, seeds: &[String]) -> DomainResult<Vec<Target>>;

    async fn health_check(&self) -> DomainResult<()> {
        Ok(())
    }
}

/// Registry of source providers, keyed by source type name.
///
/// Writers are rare (startup registration only); reads happen on every
/// stage evaluation.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn SourceProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<dyn SourceProvider>) {
        let name = provider.name().to_string();
        if let Ok(mut providers) = self.providers.write() {
            providers.insert(name, provider);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceProvider>> {
        self.providers.read().ok()?.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers
            .read()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Resolves a stage's target policy into a deduplicated target list.
pub struct TargetProviderService {
    registry: Arc<ProviderRegistry>,
}

impl TargetProviderService {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Expand a target policy into concrete targets.
    ///
    /// `seeds` is the project scope, used as the fallback when the policy
    /// declares no sources and as the input to seed-driven providers.
    pub async fn resolve(
        &self,
        ctx: &ProvideContext,
        policy: &TargetPolicy,
        seeds: &[String],
    ) -> DomainResult<Vec<Target>> {
        if policy.is_empty() {
            return Ok(seeds.iter().map(Target::from_seed).collect());
        }

        let mut targets = self.resolve_sources(ctx, &policy.target_sources, seeds).await?;
        targets = dedup_by_value(targets);

        if policy.whitelist_enabled && !policy.whitelist_sources.is_empty() {
            let whitelist = self.resolve_sources(ctx, &policy.whitelist_sources, seeds).await?;
            let blocked: HashSet<String> = whitelist.into_iter().map(|t| t.value).collect();
            let before = targets.len();
            targets.retain(|t| !blocked.contains(&t.value));
            debug!(
                stage_id = %ctx.stage_id,
                removed = before - targets.len(),
                "stage whitelist subtraction applied"
            );
        }

        if policy.skip_enabled {
            if let Some(rule) = &policy.skip_rule {
                let before = targets.len();
                targets.retain(|t| !rule.matches(&t.match_context()));
                debug!(
                    stage_id = %ctx.stage_id,
                    removed = before - targets.len(),
                    "stage skip rule applied"
                );
            }
        }

        Ok(targets)
    }

    /// Run every source entry through its provider, concatenating output.
    ///
    /// Unknown source types and transient provider failures are logged and
    /// skipped; a misconfigured source (`DomainError::Configuration`) fails
    /// the whole resolution so the operator sees it.
    async fn resolve_sources(
        &self,
        ctx: &ProvideContext,
        sources: &[TargetSource],
        seeds: &[String],
    ) -> DomainResult<Vec<Target>> {
        let mut targets = Vec::new();

        for source in sources {
            let Some(provider) = self.registry.get(&source.source_type) else {
                warn!(source_type = %source.source_type, stage_id = %ctx.stage_id, "unknown target source type, skipping");
                continue;
            };

            match provider.provide(ctx, source, seeds).await {
                Ok(mut provided) => {
                    debug!(
                        provider = provider.name(),
                        stage_id = %ctx.stage_id,
                        count = provided.len(),
                        "source provider produced targets"
                    );
                    targets.append(&mut provided);
                }
                Err(err @ DomainError::Configuration(_)) => return Err(err),
                Err(err) => {
                    warn!(provider = provider.name(), stage_id = %ctx.stage_id, error = %err, "source provider failed, skipping");
                }
            }
        }

        Ok(targets)
    }
}

/// Deduplicate by target value; first occurrence wins, order preserved.
fn dedup_by_value(targets: Vec<Target>) -> Vec<Target> {
    let mut seen = HashSet::with_capacity(targets.len());
    targets.into_iter().filter(|t| seen.insert(t.value.clone())).collect()
}
