//! Row-conversion helpers shared by the SQLite repositories.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

pub(crate) fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DomainError::Serialization(format!("invalid uuid {s:?}: {e}")))
}

pub(crate) fn parse_ts(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DomainError::Serialization(format!("invalid timestamp {s:?}: {e}")))
}

pub(crate) fn parse_opt_ts(s: Option<&str>) -> DomainResult<Option<DateTime<Utc>>> {
    s.map(parse_ts).transpose()
}

/// Parse a JSON-array column of strings.
pub(crate) fn parse_string_vec(s: &str) -> DomainResult<Vec<String>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(s).map_err(|e| DomainError::Serialization(format!("invalid string list column: {e}")))
}

/// Parse a JSON-array column of UUIDs.
pub(crate) fn parse_uuid_vec(s: &str) -> DomainResult<Vec<Uuid>> {
    parse_string_vec(s)?.iter().map(|v| parse_uuid(v)).collect()
}

pub(crate) fn to_json_string<T: serde::Serialize>(value: &T) -> DomainResult<String> {
    serde_json::to_string(value).map_err(DomainError::from)
}

/// Placeholder list for a dynamic `IN (...)` clause.
pub(crate) fn placeholders(count: usize) -> String {
    std::iter::repeat("?").take(count).collect::<Vec<_>>().join(", ")
}
