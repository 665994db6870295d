//! SQLite implementation of the PolicyRuleRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{MatchRule, SkipPolicy, WhitelistEntry, WhitelistTargetType};
use crate::domain::ports::PolicyRuleRepository;

use super::utils::{parse_string_vec, parse_uuid, to_json_string};

#[derive(Clone)]
pub struct SqlitePolicyRuleRepository {
    pool: SqlitePool,
}

impl SqlitePolicyRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct WhitelistRow {
    id: String,
    name: String,
    target_type: String,
    target_value: String,
    enabled: i64,
}

impl TryFrom<WhitelistRow> for WhitelistEntry {
    type Error = DomainError;

    fn try_from(row: WhitelistRow) -> Result<Self, Self::Error> {
        Ok(WhitelistEntry {
            id: parse_uuid(&row.id)?,
            name: row.name,
            target_type: WhitelistTargetType::parse_str(&row.target_type)
                .ok_or_else(|| DomainError::Serialization(format!("unknown whitelist target type {:?}", row.target_type)))?,
            target_value: row.target_value,
            enabled: row.enabled != 0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SkipPolicyRow {
    id: String,
    name: String,
    enabled: i64,
    block_env_tags: String,
    block_time_windows: String,
    match_rule: Option<String>,
}

impl TryFrom<SkipPolicyRow> for SkipPolicy {
    type Error = DomainError;

    fn try_from(row: SkipPolicyRow) -> Result<Self, Self::Error> {
        let match_rule: Option<MatchRule> = row
            .match_rule
            .as_deref()
            .filter(|s| !s.is_empty() && *s != "null")
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| DomainError::Configuration(format!("malformed match rule on skip policy {}: {e}", row.name)))?;

        Ok(SkipPolicy {
            id: parse_uuid(&row.id)?,
            name: row.name,
            enabled: row.enabled != 0,
            block_env_tags: parse_string_vec(&row.block_env_tags)?,
            block_time_windows: parse_string_vec(&row.block_time_windows)?,
            match_rule,
        })
    }
}

#[async_trait]
impl PolicyRuleRepository for SqlitePolicyRuleRepository {
    async fn enabled_whitelist(&self) -> DomainResult<Vec<WhitelistEntry>> {
        let rows: Vec<WhitelistRow> = sqlx::query_as("SELECT * FROM asset_whitelist WHERE enabled = 1")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(WhitelistEntry::try_from).collect()
    }

    async fn enabled_skip_policies(&self) -> DomainResult<Vec<SkipPolicy>> {
        let rows: Vec<SkipPolicyRow> = sqlx::query_as("SELECT * FROM skip_policies WHERE enabled = 1")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SkipPolicy::try_from).collect()
    }

    async fn insert_whitelist(&self, entry: &WhitelistEntry) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO asset_whitelist (id, name, target_type, target_value, enabled)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.name)
        .bind(entry.target_type.as_str())
        .bind(&entry.target_value)
        .bind(i64::from(entry.enabled))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_skip_policy(&self, policy: &SkipPolicy) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO skip_policies (id, name, enabled, block_env_tags, block_time_windows, match_rule)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(policy.id.to_string())
        .bind(&policy.name)
        .bind(i64::from(policy.enabled))
        .bind(to_json_string(&policy.block_env_tags)?)
        .bind(to_json_string(&policy.block_time_windows)?)
        .bind(policy.match_rule.as_ref().map(to_json_string).transpose()?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
