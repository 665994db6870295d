//! Database target source: targets pulled from the master's own database.
//!
//! External database connections (via `auth_config`) are not supported yet;
//! the provider always runs against the master's pool and logs when a
//! policy asks for more.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Target, TargetSource, TargetType};

use super::{ProvideContext, SourceProvider};

const ALLOWED_WHERE_OPS: &[&str] = &["=", ">", "<", ">=", "<=", "!=", "LIKE", "IN"];

pub struct DatabaseProvider {
    pool: SqlitePool,
}

impl DatabaseProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn build_table_query(&self, source: &TargetSource) -> DomainResult<(String, Vec<Value>)> {
        let table = source
            .source_value
            .as_str()
            .ok_or_else(|| DomainError::Configuration("database source requires a table name".to_string()))?;
        validate_identifier(table)?;

        let mut sql = format!("SELECT * FROM {table}");
        let mut bindings = Vec::new();

        let where_rules = source.filter_rules.get("where").and_then(Value::as_array);
        if let Some(rules) = where_rules {
            let mut clauses = Vec::new();
            for rule in rules {
                let field = rule
                    .get("field")
                    .and_then(Value::as_str)
                    .ok_or_else(|| DomainError::Configuration("where rule missing field".to_string()))?;
                validate_identifier(field)?;

                let op = rule.get("op").and_then(Value::as_str).unwrap_or("=");
                let op = op.trim().to_uppercase();
                if !ALLOWED_WHERE_OPS.contains(&op.as_str()) {
                    return Err(DomainError::Configuration(format!("unsupported where operator {op:?}")));
                }

                let value = rule.get("value").cloned().unwrap_or(Value::Null);
                if op == "IN" {
                    let items = match value {
                        Value::Array(items) => items,
                        other => vec![other],
                    };
                    if items.is_empty() {
                        return Err(DomainError::Configuration("IN rule requires at least one value".to_string()));
                    }
                    let marks = vec!["?"; items.len()].join(", ");
                    clauses.push(format!("{field} IN ({marks})"));
                    bindings.extend(items);
                } else {
                    clauses.push(format!("{field} {op} ?"));
                    bindings.push(value);
                }
            }
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
        }

        let limit = source.filter_rules.get("limit").and_then(Value::as_u64).unwrap_or(10_000);
        sql.push_str(&format!(" LIMIT {limit}"));

        Ok((sql, bindings))
    }

    fn validate_raw_sql(sql: &str) -> DomainResult<()> {
        let first_word = sql.split_whitespace().next().unwrap_or("");
        if !first_word.eq_ignore_ascii_case("select") {
            return Err(DomainError::Configuration(
                "sql query mode accepts SELECT statements only".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceProvider for DatabaseProvider {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn provide(&self, _ctx: &ProvideContext, source: &TargetSource, _seeds: &[String]) -> DomainResult<Vec<Target>> {
        if !source.auth_config.is_null() && source.auth_config.as_object().map(|o| !o.is_empty()).unwrap_or(true) {
            warn!("external database connections are not supported; using the master's own database");
        }

        // Missing value_column is catastrophic misconfiguration: fail the
        // resolution rather than silently producing nothing.
        let value_column = source
            .parser_config
            .get("value_column")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| DomainError::Configuration("database source requires parser_config.value_column".to_string()))?;

        let meta_columns: Vec<String> = source
            .parser_config
            .get("meta_columns")
            .and_then(Value::as_array)
            .map(|cols| cols.iter().filter_map(Value::as_str).map(ToString::to_string).collect())
            .unwrap_or_default();

        let query_mode = if source.query_mode.is_empty() { "table" } else { source.query_mode.as_str() };
        let (sql, bindings) = match query_mode {
            "table" | "view" => self.build_table_query(source)?,
            "sql" => {
                let raw = source
                    .source_value
                    .as_str()
                    .ok_or_else(|| DomainError::Configuration("sql source requires a statement".to_string()))?;
                Self::validate_raw_sql(raw)?;
                (raw.to_string(), Vec::new())
            }
            other => {
                return Err(DomainError::Configuration(format!("unknown database query mode {other:?}")));
            }
        };

        let mut query = sqlx::query(&sql);
        for binding in &bindings {
            query = match binding {
                Value::Number(n) if n.is_i64() => query.bind(n.as_i64()),
                Value::Number(n) => query.bind(n.as_f64()),
                Value::Bool(b) => query.bind(i64::from(*b)),
                Value::String(s) => query.bind(s.clone()),
                other => query.bind(other.to_string()),
            };
        }
        let rows = query.fetch_all(&self.pool).await?;

        let source_name = match query_mode {
            "sql" => "sql",
            _ => source.source_value.as_str().unwrap_or("db"),
        };
        let source_tag = format!("database:{source_name}");
        let target_type = TargetType::parse_or_unknown(&source.target_type);

        let mut targets = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(value) = column_as_string(row, value_column) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let mut target = Target::new(target_type, value, source_tag.clone());
            for column in &meta_columns {
                if let Some(meta) = column_as_string(row, column) {
                    target.meta.insert(column.clone(), meta);
                }
            }
            targets.push(target);
        }
        Ok(targets)
    }
}

/// Table and column names are restricted to `[A-Za-z0-9_]+`; anything else
/// is rejected before it reaches the SQL text.
fn validate_identifier(name: &str) -> DomainResult<()> {
    let pattern = Regex::new(r"^[A-Za-z0-9_]+$").expect("static identifier pattern");
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(DomainError::Configuration(format!("invalid identifier {name:?}")))
    }
}

/// Read a column as a display string regardless of its SQLite type.
fn column_as_string(row: &SqliteRow, column: &str) -> Option<String> {
    if let Ok(v) = row.try_get::<String, _>(column) {
        return Some(v.trim().to_string());
    }
    if let Ok(v) = row.try_get::<i64, _>(column) {
        return Some(v.to_string());
    }
    if let Ok(v) = row.try_get::<f64, _>(column) {
        return Some(v.to_string());
    }
    None
}
