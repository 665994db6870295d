//! Matcher rule trees.
//!
//! The matcher is the internal predicate language used by skip rules and by
//! `previous_stage` unwind filters. A rule is either a composite (`and`/`or`
//! over sub-rules) or a leaf comparing one context field against a value.
//!
//! Rules arrive as JSON and must tolerate being embedded in larger policy
//! documents, so parsing is serde-driven and a malformed tree is a
//! configuration error at the call site, never a panic.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::IpAddr;

/// Comparison operator of a leaf rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Regex,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    In,
    NotIn,
    Exists,
    Cidr,
    ListContains,
    Like,
}

/// A single field comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafRule {
    /// Context field, dotted paths supported (`meta.os`).
    pub field: String,
    pub operator: MatchOperator,
    /// Comparison value. Absent for `exists`.
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub ignore_case: bool,
}

/// A recursive predicate tree: composite `and`/`or` nodes over leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchRule {
    And {
        and: Vec<MatchRule>,
    },
    Or {
        or: Vec<MatchRule>,
    },
    Leaf(LeafRule),
}

impl MatchRule {
    pub fn all(rules: Vec<MatchRule>) -> Self {
        Self::And { and: rules }
    }

    pub fn any(rules: Vec<MatchRule>) -> Self {
        Self::Or { or: rules }
    }

    pub fn leaf(field: impl Into<String>, operator: MatchOperator, value: Value) -> Self {
        Self::Leaf(LeafRule {
            field: field.into(),
            operator,
            value,
            ignore_case: false,
        })
    }

    /// Evaluate the rule against a JSON context object.
    ///
    /// An empty `and` is vacuously true; an empty `or` matches nothing.
    pub fn matches(&self, ctx: &Value) -> bool {
        match self {
            Self::And { and } => and.iter().all(|r| r.matches(ctx)),
            Self::Or { or } => or.iter().any(|r| r.matches(ctx)),
            Self::Leaf(leaf) => leaf.matches(ctx),
        }
    }
}

impl LeafRule {
    pub fn matches(&self, ctx: &Value) -> bool {
        let field = resolve_path(ctx, &self.field);

        match self.operator {
            MatchOperator::Exists => field.map(|v| !v.is_null()).unwrap_or(false),
            // Negated operators hold when the field is absent.
            MatchOperator::NotEquals => match field {
                Some(v) => !self.string_eq(&render(v)),
                None => true,
            },
            MatchOperator::NotContains => match field {
                Some(v) => !self.fold(&render(v)).contains(&self.fold(&render(&self.value))),
                None => true,
            },
            MatchOperator::NotIn => match field {
                Some(v) => !self.in_set(&render(v)),
                None => true,
            },
            _ => {
                let Some(field) = field else { return false };
                self.matches_present(field)
            }
        }
    }

    fn matches_present(&self, field: &Value) -> bool {
        let fv = render(field);
        let rv = render(&self.value);

        match self.operator {
            MatchOperator::Equals => self.string_eq(&fv),
            MatchOperator::Contains => self.fold(&fv).contains(&self.fold(&rv)),
            MatchOperator::StartsWith => self.fold(&fv).starts_with(&self.fold(&rv)),
            MatchOperator::EndsWith => self.fold(&fv).ends_with(&self.fold(&rv)),
            MatchOperator::Regex => self.regex_match(&fv, &rv),
            MatchOperator::GreaterThan => compare(&fv, &rv).map(std::cmp::Ordering::is_gt).unwrap_or(false),
            MatchOperator::LessThan => compare(&fv, &rv).map(std::cmp::Ordering::is_lt).unwrap_or(false),
            MatchOperator::GreaterThanOrEqual => compare(&fv, &rv).map(std::cmp::Ordering::is_ge).unwrap_or(false),
            MatchOperator::LessThanOrEqual => compare(&fv, &rv).map(std::cmp::Ordering::is_le).unwrap_or(false),
            MatchOperator::In => self.in_set(&fv),
            MatchOperator::Cidr => cidr_contains(&rv, &fv),
            MatchOperator::ListContains => match field {
                Value::Array(items) => items.iter().any(|item| self.string_eq_pair(&render(item), &rv)),
                _ => false,
            },
            MatchOperator::Like => self.like_match(&fv, &rv),
            // Handled in matches().
            MatchOperator::Exists | MatchOperator::NotEquals | MatchOperator::NotContains | MatchOperator::NotIn => false,
        }
    }

    fn fold(&self, s: &str) -> String {
        if self.ignore_case {
            s.to_lowercase()
        } else {
            s.to_string()
        }
    }

    fn string_eq(&self, field: &str) -> bool {
        self.string_eq_pair(field, &render(&self.value))
    }

    fn string_eq_pair(&self, a: &str, b: &str) -> bool {
        if self.ignore_case {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    fn regex_match(&self, field: &str, pattern: &str) -> bool {
        let pattern = if self.ignore_case {
            format!("(?i){pattern}")
        } else {
            pattern.to_string()
        };
        match regex::Regex::new(&pattern) {
            Ok(re) => re.is_match(field),
            Err(err) => {
                tracing::warn!(pattern = %pattern, error = %err, "invalid regex in match rule");
                false
            }
        }
    }

    /// SQL LIKE semantics: `%` matches any run, `_` matches one character.
    fn like_match(&self, field: &str, pattern: &str) -> bool {
        let mut re = String::with_capacity(pattern.len() + 8);
        re.push('^');
        for ch in pattern.chars() {
            match ch {
                '%' => re.push_str(".*"),
                '_' => re.push('.'),
                c => re.push_str(&regex::escape(&c.to_string())),
            }
        }
        re.push('$');
        self.regex_match(field, &re)
    }

    /// Membership: rule value may be a JSON array or a comma-separated string.
    fn in_set(&self, field: &str) -> bool {
        match &self.value {
            Value::Array(items) => items.iter().any(|item| self.string_eq_pair(&render(item), field)),
            Value::String(s) => s.split(',').any(|item| self.string_eq_pair(item.trim(), field)),
            other => self.string_eq_pair(&render(other), field),
        }
    }
}

/// Resolve a dotted path (`meta.os`) against a JSON object.
fn resolve_path<'a>(ctx: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = ctx;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Render a JSON value for string comparison.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Ordered comparison: numeric when both sides parse as numbers, string
/// order otherwise. Time-of-day strings ("09:30") deliberately take the
/// string path, where lexicographic order is chronological order.
fn compare(a: &str, b: &str) -> Option<std::cmp::Ordering> {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y),
        _ => Some(a.cmp(b)),
    }
}

/// CIDR containment: the rule value is a network (or bare IP), the field an IP.
fn cidr_contains(network: &str, addr: &str) -> bool {
    let Ok(addr) = addr.trim().parse::<IpAddr>() else {
        return false;
    };
    if let Ok(net) = network.trim().parse::<IpNet>() {
        return net.contains(&addr);
    }
    // A bare IP acts as a /32 (or /128) network.
    network
        .trim()
        .parse::<IpAddr>()
        .map(|net_addr| net_addr == addr)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(field: &str, op: MatchOperator, value: Value) -> MatchRule {
        MatchRule::leaf(field, op, value)
    }

    #[test]
    fn test_parse_composite_and_leaf() {
        let rule: MatchRule = serde_json::from_value(json!({
            "and": [
                {"field": "state", "operator": "equals", "value": "open"},
                {"or": [
                    {"field": "port", "operator": "greater_than", "value": 100},
                    {"field": "service", "operator": "equals", "value": "http"}
                ]}
            ]
        }))
        .unwrap();

        assert!(rule.matches(&json!({"state": "open", "port": 80, "service": "http"})));
        assert!(rule.matches(&json!({"state": "open", "port": 443, "service": "https"})));
        assert!(!rule.matches(&json!({"state": "closed", "port": 443, "service": "https"})));
        assert!(!rule.matches(&json!({"state": "open", "port": 22, "service": "ssh"})));
    }

    #[test]
    fn test_equals_and_ignore_case() {
        assert!(leaf("os", MatchOperator::Equals, json!("linux")).matches(&json!({"os": "linux"})));
        assert!(!leaf("os", MatchOperator::Equals, json!("linux")).matches(&json!({"os": "Linux"})));

        let rule = MatchRule::Leaf(LeafRule {
            field: "os".into(),
            operator: MatchOperator::Equals,
            value: json!("LINUX"),
            ignore_case: true,
        });
        assert!(rule.matches(&json!({"os": "linux"})));
    }

    #[test]
    fn test_equals_crosses_json_types() {
        // A numeric field compares equal to its string rendering.
        assert!(leaf("port", MatchOperator::Equals, json!("80")).matches(&json!({"port": 80})));
        assert!(leaf("port", MatchOperator::Equals, json!(80)).matches(&json!({"port": "80"})));
    }

    #[test]
    fn test_numeric_comparison_with_string_fallback() {
        assert!(leaf("port", MatchOperator::GreaterThan, json!(100)).matches(&json!({"port": 443})));
        assert!(!leaf("port", MatchOperator::GreaterThan, json!(100)).matches(&json!({"port": 80})));
        // "20" < "100" numerically even though it sorts after lexically.
        assert!(leaf("n", MatchOperator::LessThan, json!("100")).matches(&json!({"n": "20"})));
        // Non-numeric operands fall back to string order: time windows.
        assert!(leaf("time", MatchOperator::GreaterThanOrEqual, json!("09:00")).matches(&json!({"time": "10:30"})));
        assert!(!leaf("time", MatchOperator::GreaterThanOrEqual, json!("09:00")).matches(&json!({"time": "08:59"})));
    }

    #[test]
    fn test_contains_family() {
        let ctx = json!({"value": "https://api.example.com/v1"});
        assert!(leaf("value", MatchOperator::Contains, json!("example.com")).matches(&ctx));
        assert!(leaf("value", MatchOperator::StartsWith, json!("https://")).matches(&ctx));
        assert!(leaf("value", MatchOperator::EndsWith, json!("/v1")).matches(&ctx));
        assert!(leaf("value", MatchOperator::NotContains, json!("internal")).matches(&ctx));
    }

    #[test]
    fn test_regex_and_like() {
        let ctx = json!({"host": "db-prod-03.internal"});
        assert!(leaf("host", MatchOperator::Regex, json!(r"^db-prod-\d+")).matches(&ctx));
        assert!(!leaf("host", MatchOperator::Regex, json!(r"^web-")).matches(&ctx));
        assert!(leaf("host", MatchOperator::Like, json!("db-prod-%")).matches(&ctx));
        assert!(leaf("host", MatchOperator::Like, json!("db-prod-__.internal")).matches(&ctx));
        assert!(!leaf("host", MatchOperator::Like, json!("db-prod-_")).matches(&ctx));
    }

    #[test]
    fn test_invalid_regex_never_matches() {
        assert!(!leaf("host", MatchOperator::Regex, json!("([")).matches(&json!({"host": "x"})));
    }

    #[test]
    fn test_in_and_not_in() {
        let ctx = json!({"env": "staging"});
        assert!(leaf("env", MatchOperator::In, json!(["dev", "staging"])).matches(&ctx));
        assert!(leaf("env", MatchOperator::In, json!("dev, staging")).matches(&ctx));
        assert!(!leaf("env", MatchOperator::In, json!(["prod"])).matches(&ctx));
        assert!(leaf("env", MatchOperator::NotIn, json!(["prod"])).matches(&ctx));
    }

    #[test]
    fn test_list_contains() {
        let ctx = json!({"tags": ["production", "dmz"]});
        assert!(leaf("tags", MatchOperator::ListContains, json!("production")).matches(&ctx));
        assert!(!leaf("tags", MatchOperator::ListContains, json!("dev")).matches(&ctx));
        // Field must be an array.
        assert!(!leaf("tags", MatchOperator::ListContains, json!("x")).matches(&json!({"tags": "production"})));
    }

    #[test]
    fn test_exists() {
        assert!(leaf("meta", MatchOperator::Exists, Value::Null).matches(&json!({"meta": {}})));
        assert!(!leaf("meta", MatchOperator::Exists, Value::Null).matches(&json!({})));
        assert!(!leaf("meta", MatchOperator::Exists, Value::Null).matches(&json!({"meta": null})));
    }

    #[test]
    fn test_cidr() {
        assert!(leaf("value", MatchOperator::Cidr, json!("10.0.0.0/24")).matches(&json!({"value": "10.0.0.17"})));
        assert!(!leaf("value", MatchOperator::Cidr, json!("10.0.0.0/24")).matches(&json!({"value": "10.0.1.17"})));
        // Bare IP acts as an exact match.
        assert!(leaf("value", MatchOperator::Cidr, json!("192.168.1.1")).matches(&json!({"value": "192.168.1.1"})));
        // Unparseable field never matches.
        assert!(!leaf("value", MatchOperator::Cidr, json!("10.0.0.0/24")).matches(&json!({"value": "example.com"})));
    }

    #[test]
    fn test_dotted_paths() {
        let ctx = json!({"meta": {"os": "linux", "cpe": {"vendor": "debian"}}});
        assert!(leaf("meta.os", MatchOperator::Equals, json!("linux")).matches(&ctx));
        assert!(leaf("meta.cpe.vendor", MatchOperator::Equals, json!("debian")).matches(&ctx));
        assert!(!leaf("meta.missing", MatchOperator::Equals, json!("x")).matches(&ctx));
    }

    #[test]
    fn test_missing_field_semantics() {
        let ctx = json!({});
        assert!(!leaf("f", MatchOperator::Equals, json!("x")).matches(&ctx));
        assert!(!leaf("f", MatchOperator::GreaterThan, json!(1)).matches(&ctx));
        // Negated operators hold vacuously.
        assert!(leaf("f", MatchOperator::NotEquals, json!("x")).matches(&ctx));
        assert!(leaf("f", MatchOperator::NotIn, json!(["x"])).matches(&ctx));
    }

    #[test]
    fn test_empty_composites() {
        assert!(MatchRule::all(vec![]).matches(&json!({})));
        assert!(!MatchRule::any(vec![]).matches(&json!({})));
    }
}
