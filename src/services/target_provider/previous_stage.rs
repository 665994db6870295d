//! Previous-stage target source: targets derived from an earlier stage's
//! results in the same workflow.
//!
//! The default emission is one target per result record. When the parser
//! config declares an `unwind`, each record's attributes are walked into an
//! array, filtered per element with a match rule, and rendered through a
//! value template (`{{target_value}}`, `{{item}}`, `{{item.<field>}}`).

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{MatchRule, ScanStage, StageResult, Target, TargetSource, TargetType, TaskStatus};
use crate::domain::ports::{StageResultFilter, StageResultRepository, TaskRepository, WorkflowRepository};

use super::{ProvideContext, SourceProvider};

pub struct PreviousStageProvider {
    workflows: Arc<dyn WorkflowRepository>,
    tasks: Arc<dyn TaskRepository>,
    results: Arc<dyn StageResultRepository>,
}

impl PreviousStageProvider {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        tasks: Arc<dyn TaskRepository>,
        results: Arc<dyn StageResultRepository>,
    ) -> Self {
        Self { workflows, tasks, results }
    }

    /// Resolve which stage feeds this one: an explicit `stage_name` in the
    /// filter rules, or the nearest stage with a lower order.
    async fn resolve_source_stage(&self, ctx: &ProvideContext, source: &TargetSource) -> DomainResult<ScanStage> {
        let stages = self.workflows.list_stages(ctx.workflow_id).await?;

        let by_name = source
            .filter_rules
            .get("stage_name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty() && *n != "prev");

        if let Some(name) = by_name {
            return stages
                .into_iter()
                .find(|s| s.name == name)
                .ok_or_else(|| DomainError::Configuration(format!("previous_stage references unknown stage {name:?}")));
        }

        stages
            .into_iter()
            .filter(|s| s.stage_order < ctx.stage_order)
            .max_by_key(|s| (s.stage_order, s.id))
            .ok_or_else(|| {
                DomainError::ValidationFailed(format!(
                    "stage {} has no predecessor stage to read results from",
                    ctx.stage_id
                ))
            })
    }
}

#[async_trait]
impl SourceProvider for PreviousStageProvider {
    fn name(&self) -> &'static str {
        "previous_stage"
    }

    async fn provide(&self, ctx: &ProvideContext, source: &TargetSource, _seeds: &[String]) -> DomainResult<Vec<Target>> {
        let stage = self.resolve_source_stage(ctx, source).await?;

        let mut filter = StageResultFilter::for_stage(ctx.project_id, ctx.workflow_id, stage.id);

        // Optional trust filter: only results from agents whose tasks for
        // the source stage reached the listed statuses.
        let statuses = string_list(source.filter_rules.get("stage_status"));
        if !statuses.is_empty() {
            let statuses: Vec<TaskStatus> = statuses.iter().filter_map(|s| TaskStatus::parse_str(s)).collect();
            let agent_ids = self.tasks.agent_ids_for_stage(stage.id, &statuses).await?;
            if agent_ids.is_empty() {
                return Ok(Vec::new());
            }
            filter.agent_ids = agent_ids;
        }

        filter.result_types = string_list(source.filter_rules.get("result_type"));

        let records = self.results.query(&filter).await?;
        let source_tag = format!("stage:{}", stage.id);

        let unwind = source.parser_config.get("unwind");
        let Some(unwind) = unwind.filter(|u| !u.is_null()) else {
            // Direct emission: one target per result record.
            return Ok(records
                .iter()
                .filter(|r| !r.target_value.is_empty())
                .map(|r| {
                    Target::new(
                        TargetType::parse_or_unknown(&r.target_type),
                        r.target_value.clone(),
                        source_tag.clone(),
                    )
                })
                .collect());
        };

        let generate = source.parser_config.get("generate").cloned().unwrap_or(Value::Null);
        let unwind_filter: Option<MatchRule> = match unwind.get("filter") {
            Some(f) if !f.is_null() => Some(
                serde_json::from_value(f.clone())
                    .map_err(|e| DomainError::Configuration(format!("malformed unwind filter: {e}")))?,
            ),
            _ => None,
        };
        let path = unwind.get("path").and_then(Value::as_str).unwrap_or("@this");

        let mut targets = Vec::new();
        for record in &records {
            targets.extend(unwind_record(record, path, unwind_filter.as_ref(), &generate, &source_tag));
        }
        Ok(targets)
    }
}

/// Expand one result record through the unwind pipeline.
fn unwind_record(
    record: &StageResult,
    path: &str,
    filter: Option<&MatchRule>,
    generate: &Value,
    source_tag: &str,
) -> Vec<Target> {
    let root = match path {
        "@this" | "" => Some(&record.attributes),
        dotted => resolve_path(&record.attributes, dotted),
    };
    let Some(Value::Array(items)) = root else {
        warn!(result_id = %record.id, path, "unwind path does not resolve to an array, skipping record");
        return Vec::new();
    };

    let template = generate.get("value_template").and_then(Value::as_str).unwrap_or("{{item}}");
    let target_type = generate
        .get("type")
        .and_then(Value::as_str)
        .map(TargetType::parse_or_unknown)
        .unwrap_or(TargetType::Unknown);
    let meta_map = generate.get("meta_map").and_then(Value::as_object);

    let mut targets = Vec::new();
    for item in items {
        if let Some(filter) = filter {
            if !filter.matches(item) {
                continue;
            }
        }

        let value = render_template(template, record, item);
        if value.is_empty() {
            continue;
        }

        let mut target = Target::new(target_type, value, source_tag.to_string());
        if let Some(meta_map) = meta_map {
            for (key, template) in meta_map {
                if let Some(template) = template.as_str() {
                    let rendered = render_template(template, record, item);
                    if !rendered.is_empty() {
                        target.meta.insert(key.clone(), rendered);
                    }
                }
            }
        }
        targets.push(target);
    }
    targets
}

/// Render `{{target_value}}`, `{{item}}`, and `{{item.<field>}}` tokens.
fn render_template(template: &str, record: &StageResult, item: &Value) -> String {
    let token = Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("static template pattern");
    token
        .replace_all(template, |caps: &regex::Captures<'_>| match &caps[1] {
            "target_value" => record.target_value.clone(),
            "item" => render_value(item),
            path => path
                .strip_prefix("item.")
                .and_then(|p| resolve_path(item, p))
                .map(render_value)
                .unwrap_or_default(),
        })
        .trim()
        .to_string()
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(ToString::to_string).collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn record(target_value: &str, attributes: Value) -> StageResult {
        StageResult::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "agent-1", target_value)
            .with_attributes(attributes)
    }

    #[test]
    fn test_unwind_filter_and_template() {
        // Open ports only; of those, high ports or http.
        let rec = record(
            "10.0.0.1",
            json!([
                {"port": 80, "service": "http", "state": "open"},
                {"port": 22, "service": "ssh", "state": "open"},
                {"port": 443, "service": "https", "state": "closed"}
            ]),
        );
        let filter: MatchRule = serde_json::from_value(json!({
            "and": [
                {"field": "state", "operator": "equals", "value": "open"},
                {"or": [
                    {"field": "port", "operator": "greater_than", "value": 100},
                    {"field": "service", "operator": "equals", "value": "http"}
                ]}
            ]
        }))
        .unwrap();
        let generate = json!({"value_template": "{{target_value}}:{{item.port}}", "type": "url"});

        let targets = unwind_record(&rec, "@this", Some(&filter), &generate, "stage:x");

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].value, "10.0.0.1:80");
        assert_eq!(targets[0].target_type, TargetType::Url);
    }

    #[test]
    fn test_unwind_nested_path_and_meta_map() {
        let rec = record(
            "h.example.com",
            json!({"scan": {"ports": [{"port": 8080, "proto": "tcp"}]}}),
        );
        let generate = json!({
            "value_template": "{{target_value}}:{{item.port}}",
            "meta_map": {"proto": "{{item.proto}}"}
        });

        let targets = unwind_record(&rec, "scan.ports", None, &generate, "stage:x");

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].value, "h.example.com:8080");
        assert_eq!(targets[0].meta.get("proto").map(String::as_str), Some("tcp"));
    }

    #[test]
    fn test_unwind_non_array_path_skips_record() {
        let rec = record("10.0.0.1", json!({"ports": "not-an-array"}));
        let targets = unwind_record(&rec, "ports", None, &Value::Null, "stage:x");
        assert!(targets.is_empty());
    }

    #[test]
    fn test_template_item_token_renders_scalars() {
        let rec = record("10.0.0.1", json!(["a.example.com", "b.example.com"]));
        let generate = json!({"value_template": "{{item}}", "type": "domain"});
        let targets = unwind_record(&rec, "@this", None, &generate, "stage:x");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].value, "a.example.com");
    }

    #[test]
    fn test_empty_render_is_dropped() {
        let rec = record("10.0.0.1", json!([{"port": 80}]));
        let generate = json!({"value_template": "{{item.missing}}"});
        let targets = unwind_record(&rec, "@this", None, &generate, "stage:x");
        assert!(targets.is_empty());
    }
}
