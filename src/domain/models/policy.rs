//! Declarative policy documents.
//!
//! `TargetPolicy` is the per-stage target specification embedded in a scan
//! stage. `WhitelistEntry` and `SkipPolicy` are the global, DB-backed rules
//! the enforcer consults. `PolicySnapshot` is the frozen copy of project
//! scope plus stage policy stored on every task at creation time.
//!
//! All wire-facing structs default every field and ignore unknown keys so
//! that older masters tolerate newer policy documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::matcher::MatchRule;

/// Where a stage's targets come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Manual,
    ProjectTarget,
    File,
    Database,
    Api,
    PreviousStage,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::ProjectTarget => "project_target",
            Self::File => "file",
            Self::Database => "database",
            Self::Api => "api",
            Self::PreviousStage => "previous_stage",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "project_target" => Some(Self::ProjectTarget),
            "file" => Some(Self::File),
            "database" => Some(Self::Database),
            "api" => Some(Self::Api),
            "previous_stage" => Some(Self::PreviousStage),
            _ => None,
        }
    }
}

/// One declarative target-source entry.
///
/// `source_type` is kept as a raw string so an unknown type degrades to a
/// logged skip instead of failing the whole policy parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSource {
    #[serde(default)]
    pub source_type: String,
    /// Declared type of the produced targets (`ip`, `domain`, ...).
    #[serde(default)]
    pub target_type: String,
    /// Provider-specific locator: inline list, file path, table name...
    #[serde(default)]
    pub source_value: Value,
    /// Provider-specific selection rules (stage name, WHERE clauses...).
    #[serde(default)]
    pub filter_rules: Value,
    /// Provider-specific parsing instructions (format, columns, unwind...).
    #[serde(default)]
    pub parser_config: Value,
    /// Reserved for external-source credentials; unsupported today.
    #[serde(default)]
    pub auth_config: Value,
    /// Database sources: `table`, `view`, or `sql`.
    #[serde(default)]
    pub query_mode: String,
}

impl TargetSource {
    pub fn source_type(&self) -> Option<SourceType> {
        SourceType::parse_str(&self.source_type)
    }
}

/// Per-stage declarative target specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetPolicy {
    #[serde(default)]
    pub target_sources: Vec<TargetSource>,
    #[serde(default)]
    pub whitelist_enabled: bool,
    #[serde(default)]
    pub whitelist_sources: Vec<TargetSource>,
    #[serde(default)]
    pub skip_enabled: bool,
    #[serde(default)]
    pub skip_rule: Option<MatchRule>,
}

impl TargetPolicy {
    /// A policy with no sources falls back to the project scope seeds.
    pub fn is_empty(&self) -> bool {
        self.target_sources.is_empty()
    }
}

/// Kind of a global whitelist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitelistTargetType {
    Ip,
    IpRange,
    Cidr,
    Domain,
    DomainPattern,
    Url,
    Keyword,
}

impl WhitelistTargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::IpRange => "ip_range",
            Self::Cidr => "cidr",
            Self::Domain => "domain",
            Self::DomainPattern => "domain_pattern",
            Self::Url => "url",
            Self::Keyword => "keyword",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ip" => Some(Self::Ip),
            "ip_range" => Some(Self::IpRange),
            "cidr" => Some(Self::Cidr),
            "domain" | "host" => Some(Self::Domain),
            "domain_pattern" => Some(Self::DomainPattern),
            "url" => Some(Self::Url),
            "keyword" => Some(Self::Keyword),
            _ => None,
        }
    }
}

/// One entry of the global never-scan list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub id: Uuid,
    pub name: String,
    pub target_type: WhitelistTargetType,
    pub target_value: String,
    pub enabled: bool,
}

impl WhitelistEntry {
    pub fn new(name: impl Into<String>, target_type: WhitelistTargetType, value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            target_type,
            target_value: value.into(),
            enabled: true,
        }
    }
}

/// A global skip policy: a declarative predicate that rejects tasks before
/// dispatch when it matches.
///
/// `block_env_tags` and `block_time_windows` predate the matcher language
/// and are folded into the aggregate rule at evaluation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkipPolicy {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub block_env_tags: Vec<String>,
    /// Windows in "HH:MM-HH:MM" form; malformed windows are ignored.
    #[serde(default)]
    pub block_time_windows: Vec<String>,
    #[serde(default)]
    pub match_rule: Option<MatchRule>,
}

/// The frozen policy copy stored on every task at creation time.
///
/// The enforcer evaluates this snapshot, never the live project row, so a
/// task sees one consistent policy for its whole lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    /// Project scope entries (CIDR / IP / domain suffix). Empty permits all.
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub project_tags: Vec<String>,
    #[serde(default)]
    pub target_policy: TargetPolicy,
}
