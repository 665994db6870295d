//! Transient target model.
//!
//! Targets exist only between target-source resolution and task creation.
//! They are never persisted on their own; a serialized copy rides along in
//! the task's `input_target` column.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Kind of scannable endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Ip,
    IpRange,
    Domain,
    Url,
    /// Source did not declare a type (e.g. raw project-scope seeds).
    Unknown,
}

impl Default for TargetType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::IpRange => "ip_range",
            Self::Domain => "domain",
            Self::Url => "url",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ip" => Some(Self::Ip),
            "ip_range" => Some(Self::IpRange),
            "domain" => Some(Self::Domain),
            "url" => Some(Self::Url),
            "unknown" | "" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Parse a declared type, falling back to `Unknown` for anything
    /// providers do not recognize. Providers are dumb: they never reject
    /// a target because its declared type looks wrong.
    pub fn parse_or_unknown(s: &str) -> Self {
        Self::parse_str(s).unwrap_or(Self::Unknown)
    }
}

/// A single scannable endpoint produced by a source provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// What kind of endpoint this is.
    #[serde(rename = "type", default)]
    pub target_type: TargetType,
    /// The endpoint value (IP, CIDR, hostname, URL).
    pub value: String,
    /// Which source produced this target (e.g. "manual", "stage:<id>").
    #[serde(default)]
    pub source: String,
    /// Free-form metadata carried into the task for downstream tools.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
}

impl Target {
    pub fn new(target_type: TargetType, value: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            target_type,
            value: value.into(),
            source: source.into(),
            meta: HashMap::new(),
        }
    }

    /// Wrap a raw seed value (project scope entry) as a target.
    pub fn from_seed(value: impl Into<String>) -> Self {
        Self::new(TargetType::Unknown, value, "seed")
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Evaluation context for skip-rule matching: `{value, type, source, meta}`.
    pub fn match_context(&self) -> serde_json::Value {
        serde_json::json!({
            "value": self.value,
            "type": self.target_type.as_str(),
            "source": self.source,
            "meta": self.meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_type_round_trip() {
        for t in [TargetType::Ip, TargetType::IpRange, TargetType::Domain, TargetType::Url, TargetType::Unknown] {
            assert_eq!(TargetType::parse_str(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_parse_or_unknown_never_fails() {
        assert_eq!(TargetType::parse_or_unknown("ip"), TargetType::Ip);
        assert_eq!(TargetType::parse_or_unknown("asset"), TargetType::Unknown);
        assert_eq!(TargetType::parse_or_unknown(""), TargetType::Unknown);
    }

    #[test]
    fn test_seed_target() {
        let t = Target::from_seed("10.0.0.0/24");
        assert_eq!(t.target_type, TargetType::Unknown);
        assert_eq!(t.source, "seed");
    }

    #[test]
    fn test_match_context_exposes_meta_path() {
        let t = Target::new(TargetType::Domain, "example.com", "manual").with_meta("os", "linux");
        let ctx = t.match_context();
        assert_eq!(ctx["meta"]["os"], "linux");
        assert_eq!(ctx["type"], "domain");
    }

    #[test]
    fn test_serialized_shape() {
        let t = Target::new(TargetType::Ip, "10.0.0.5", "manual");
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["type"], "ip");
        assert_eq!(json["value"], "10.0.0.5");
        // Empty meta is omitted on the wire.
        assert!(json.get("meta").is_none());
    }
}
