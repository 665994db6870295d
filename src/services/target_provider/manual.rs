//! Manual target source: inline values typed into the stage policy.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Target, TargetSource, TargetType};

use super::{ProvideContext, SourceProvider};

/// Splits an inline declaration into targets. A string value is split on
/// commas, semicolons, and newlines; an array value is taken element-wise.
/// No format validation happens here.
pub struct ManualProvider;

#[async_trait]
impl SourceProvider for ManualProvider {
    fn name(&self) -> &'static str {
        "manual"
    }

    async fn provide(&self, _ctx: &ProvideContext, source: &TargetSource, _seeds: &[String]) -> DomainResult<Vec<Target>> {
        let target_type = TargetType::parse_or_unknown(&source.target_type);

        let values: Vec<String> = match &source.source_value {
            Value::String(s) => split_tokens(s),
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        Ok(values
            .into_iter()
            .map(|value| Target::new(target_type, value, "manual"))
            .collect())
    }
}

fn split_tokens(s: &str) -> Vec<String> {
    s.split(|c| c == ',' || c == ';' || c == '\n')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}
