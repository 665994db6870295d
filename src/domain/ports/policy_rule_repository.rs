//! Global policy-rule repository port (whitelist and skip policies).

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{SkipPolicy, WhitelistEntry};

/// Repository interface for the global never-scan list and skip policies.
#[async_trait]
pub trait PolicyRuleRepository: Send + Sync {
    /// Enabled whitelist entries, the don't-scan list the enforcer checks
    /// on every dispatch.
    async fn enabled_whitelist(&self) -> DomainResult<Vec<WhitelistEntry>>;

    async fn enabled_skip_policies(&self) -> DomainResult<Vec<SkipPolicy>>;

    async fn insert_whitelist(&self, entry: &WhitelistEntry) -> DomainResult<()>;

    async fn insert_skip_policy(&self, policy: &SkipPolicy) -> DomainResult<()>;
}
