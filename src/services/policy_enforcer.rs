//! Pre-dispatch policy enforcement.
//!
//! `enforce` is called once per task immediately before dispatch and
//! evaluates, in order: the project scope, the global whitelist (the
//! never-scan list), and the global skip policies. All checks run against
//! the task's frozen policy snapshot, never the live project row.
//!
//! A violation fails the one task with a reason; a repository error is
//! surfaced as a policy-check error so the dispatcher leaves the task
//! pending and retries.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Local, Timelike};
use ipnet::IpNet;
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentTask, MatchOperator, MatchRule, SkipPolicy, Target, WhitelistEntry, WhitelistTargetType,
};
use crate::domain::ports::PolicyRuleRepository;

/// Result of the pre-dispatch gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcementOutcome {
    Ok,
    Violation { reason: String },
}

impl EnforcementOutcome {
    pub fn violation(reason: impl Into<String>) -> Self {
        Self::Violation { reason: reason.into() }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

pub struct PolicyEnforcer {
    rules: Arc<dyn PolicyRuleRepository>,
}

impl PolicyEnforcer {
    pub fn new(rules: Arc<dyn PolicyRuleRepository>) -> Self {
        Self { rules }
    }

    pub async fn enforce(&self, task: &AgentTask) -> DomainResult<EnforcementOutcome> {
        self.enforce_at(task, Local::now()).await
    }

    /// Enforcement with an injected clock, used by the time-window checks.
    pub async fn enforce_at(&self, task: &AgentTask, now: DateTime<Local>) -> DomainResult<EnforcementOutcome> {
        let targets = parse_input_targets(&task.input_target);

        // 1. Project scope.
        let scope = &task.policy_snapshot.scope;
        if !scope.is_empty() {
            for target in &targets {
                if !scope_permits(scope, target) {
                    debug!(task_id = %task.id, target = %target, "target not in scope");
                    return Ok(EnforcementOutcome::violation("target not in scope"));
                }
            }
        }

        // 2. Global whitelist: a match anywhere is an immediate violation.
        let whitelist = self
            .rules
            .enabled_whitelist()
            .await
            .map_err(|e| DomainError::PolicyCheck(format!("whitelist lookup failed: {e}")))?;
        for target in &targets {
            let host = host_of(target);
            for entry in &whitelist {
                if whitelist_matches(entry, target, &host) {
                    debug!(task_id = %task.id, target = %target, entry = %entry.name, "target whitelisted");
                    return Ok(EnforcementOutcome::violation(format!("whitelisted by {}", entry.name)));
                }
            }
        }

        // 3. Global skip policies.
        let policies = self
            .rules
            .enabled_skip_policies()
            .await
            .map_err(|e| DomainError::PolicyCheck(format!("skip policy lookup failed: {e}")))?;
        if !policies.is_empty() {
            let ctx = skip_context(task, &targets, now);
            for policy in &policies {
                if let Some(rule) = aggregate_skip_rule(policy) {
                    if rule.matches(&ctx) {
                        debug!(task_id = %task.id, policy = %policy.name, "skip policy matched");
                        return Ok(EnforcementOutcome::violation(format!("skip policy: {}", policy.name)));
                    }
                }
            }
        }

        Ok(EnforcementOutcome::Ok)
    }
}

/// Parse a task's `input_target` column into raw target values.
///
/// Accepted shapes, in order: a JSON array of strings, a JSON array of
/// target objects, a single target object, and finally the raw string
/// itself as one target.
fn parse_input_targets(input: &str) -> Vec<String> {
    if let Ok(values) = serde_json::from_str::<Vec<String>>(input) {
        return values;
    }
    if let Ok(targets) = serde_json::from_str::<Vec<Target>>(input) {
        return targets.into_iter().map(|t| t.value).collect();
    }
    if let Ok(target) = serde_json::from_str::<Target>(input) {
        return vec![target.value];
    }
    vec![input.to_string()]
}

/// Extract the host portion of a target: strip a URL scheme, any path, and
/// a trailing `:port`.
fn host_of(target: &str) -> String {
    let rest = match target.split_once("://") {
        Some((_, rest)) => rest,
        None => target,
    };
    let rest = rest.split(['/', '?', '#']).next().unwrap_or(rest);

    // Bracketed IPv6 hosts keep their address, lose the port.
    if let Some(stripped) = rest.strip_prefix('[') {
        if let Some((host, _)) = stripped.split_once(']') {
            return host.to_string();
        }
    }

    // A single colon followed by digits is a port; anything with more
    // colons is a bare IPv6 address.
    if rest.matches(':').count() == 1 {
        if let Some((host, port)) = rest.rsplit_once(':') {
            if port.chars().all(|c| c.is_ascii_digit()) {
                return host.to_string();
            }
        }
    }
    rest.to_string()
}

/// One scope entry permits a target when it is string-equal, a matching
/// domain suffix (`.example.com`), a CIDR containing the target's host, or
/// an IP equal to the target's host.
fn scope_permits(scope: &[String], target: &str) -> bool {
    let host = host_of(target);
    let host_ip: Option<IpAddr> = host.parse().ok();

    scope.iter().flat_map(|entry| entry.split(',')).any(|entry| {
        let entry = entry.trim();
        if entry.is_empty() {
            return false;
        }
        if entry == target {
            return true;
        }
        if entry.starts_with('.') && target.ends_with(entry) {
            return true;
        }
        if let (Ok(net), Some(ip)) = (entry.parse::<IpNet>(), host_ip) {
            return net.contains(&ip);
        }
        if let (Ok(scope_ip), Some(ip)) = (entry.parse::<IpAddr>(), host_ip) {
            return scope_ip == ip;
        }
        false
    })
}

fn whitelist_matches(entry: &WhitelistEntry, raw: &str, host: &str) -> bool {
    let value = entry.target_value.trim();
    match entry.target_type {
        WhitelistTargetType::Ip | WhitelistTargetType::IpRange | WhitelistTargetType::Cidr => {
            let Ok(ip) = host.parse::<IpAddr>() else {
                return false;
            };
            if let Ok(net) = value.parse::<IpNet>() {
                return net.contains(&ip);
            }
            value.parse::<IpAddr>().map(|entry_ip| entry_ip == ip).unwrap_or(false)
        }
        WhitelistTargetType::Domain | WhitelistTargetType::DomainPattern => {
            if host == value {
                return true;
            }
            if value.starts_with('.') && host.ends_with(value) {
                return true;
            }
            if let Some(suffix) = value.strip_prefix("*.") {
                return host.ends_with(suffix);
            }
            false
        }
        WhitelistTargetType::Url => raw.starts_with(value),
        WhitelistTargetType::Keyword => raw.contains(value),
    }
}

/// Evaluation context for skip policies: wall-clock fields plus the task
/// and project attributes available in the snapshot.
fn skip_context(task: &AgentTask, targets: &[String], now: DateTime<Local>) -> Value {
    let weekday = match now.weekday() {
        chrono::Weekday::Mon => "monday",
        chrono::Weekday::Tue => "tuesday",
        chrono::Weekday::Wed => "wednesday",
        chrono::Weekday::Thu => "thursday",
        chrono::Weekday::Fri => "friday",
        chrono::Weekday::Sat => "saturday",
        chrono::Weekday::Sun => "sunday",
    };
    json!({
        "time": format!("{:02}:{:02}", now.hour(), now.minute()),
        "hour": now.hour(),
        "weekday": weekday,
        "project_name": task.policy_snapshot.project_name,
        "tags": task.policy_snapshot.project_tags,
        "tool_name": task.tool_name,
        "target_value": task.target_value,
        "targets": targets,
    })
}

/// Fold a policy's legacy fields and match rule into one OR root.
/// Returns None when the policy has no conditions at all.
fn aggregate_skip_rule(policy: &SkipPolicy) -> Option<MatchRule> {
    let mut branches = Vec::new();

    for tag in &policy.block_env_tags {
        branches.push(MatchRule::leaf("tags", MatchOperator::ListContains, json!(tag)));
    }

    for window in &policy.block_time_windows {
        if let Some((start, end)) = window.split_once('-') {
            branches.push(MatchRule::all(vec![
                MatchRule::leaf("time", MatchOperator::GreaterThanOrEqual, json!(start.trim())),
                MatchRule::leaf("time", MatchOperator::LessThanOrEqual, json!(end.trim())),
            ]));
        }
    }

    if let Some(rule) = &policy.match_rule {
        branches.push(rule.clone());
    }

    if branches.is_empty() {
        None
    } else {
        Some(MatchRule::any(branches))
    }
}
