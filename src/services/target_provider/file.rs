//! File target source: targets read from a file on the master.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Target, TargetSource, TargetType};

use super::{ProvideContext, SourceProvider};

/// Reads targets from a local file. The parser config selects the format:
///
/// - `line`: one target per line (default).
/// - `csv`: extract one column; `column` is either a header name (first
///   row is then treated as the header) or a zero-based index.
/// - `json_array`: either an array of strings, or an array of objects from
///   which the field named by the last `json_path` segment is extracted.
pub struct FileProvider;

#[async_trait]
impl SourceProvider for FileProvider {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn provide(&self, _ctx: &ProvideContext, source: &TargetSource, _seeds: &[String]) -> DomainResult<Vec<Target>> {
        let Some(path) = source.source_value.as_str().filter(|p| !p.is_empty()) else {
            return Err(DomainError::Configuration(
                "file source requires a path in source_value".to_string(),
            ));
        };

        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DomainError::ValidationFailed(format!("cannot read target file {path}: {e}")))?;

        let format = source
            .parser_config
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or("line");

        let values = match format {
            "line" => parse_lines(&contents),
            "csv" => parse_csv(&contents, source.parser_config.get("column"))?,
            "json_array" => parse_json_array(&contents, source.parser_config.get("json_path").and_then(Value::as_str))?,
            other => {
                return Err(DomainError::Configuration(format!(
                    "unknown file parser format {other:?}"
                )))
            }
        };

        let target_type = TargetType::parse_or_unknown(&source.target_type);
        Ok(values
            .into_iter()
            .map(|value| Target::new(target_type, value, "file"))
            .collect())
    }
}

fn parse_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_csv(contents: &str, column: Option<&Value>) -> DomainResult<Vec<String>> {
    // A named column implies a header row; a numeric index implies none.
    let (named, index) = match column {
        Some(Value::String(name)) => (Some(name.as_str()), None),
        Some(Value::Number(n)) => (None, n.as_u64().map(|i| i as usize)),
        _ => (None, Some(0)),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(named.is_some())
        .flexible(true)
        .from_reader(contents.as_bytes());

    let column_index = match named {
        Some(name) => {
            let headers = reader
                .headers()
                .map_err(|e| DomainError::ValidationFailed(format!("cannot read csv header: {e}")))?;
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| DomainError::Configuration(format!("csv column {name:?} not found in header")))?
        }
        None => index.unwrap_or(0),
    };

    let mut values = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| DomainError::ValidationFailed(format!("malformed csv record: {e}")))?;
        if let Some(field) = record.get(column_index) {
            let field = field.trim();
            if !field.is_empty() {
                values.push(field.to_string());
            }
        }
    }
    Ok(values)
}

fn parse_json_array(contents: &str, json_path: Option<&str>) -> DomainResult<Vec<String>> {
    let parsed: Value = serde_json::from_str(contents)
        .map_err(|e| DomainError::ValidationFailed(format!("target file is not valid json: {e}")))?;
    let Value::Array(items) = parsed else {
        return Err(DomainError::ValidationFailed("target file json is not an array".to_string()));
    };

    let field = json_path.and_then(|p| p.rsplit('.').next()).filter(|f| !f.is_empty());

    let mut values = Vec::new();
    for item in items {
        let value = match (&item, field) {
            (Value::String(s), _) => Some(s.trim().to_string()),
            (Value::Object(map), Some(field)) => map.get(field).and_then(Value::as_str).map(|s| s.trim().to_string()),
            _ => None,
        };
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            values.push(value);
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use uuid::Uuid;

    fn ctx() -> ProvideContext {
        ProvideContext {
            project_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            stage_id: Uuid::new_v4(),
            stage_order: 1,
        }
    }

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn source(path: &str, parser_config: Value) -> TargetSource {
        TargetSource {
            source_type: "file".into(),
            target_type: "domain".into(),
            source_value: json!(path),
            parser_config,
            ..TargetSource::default()
        }
    }

    #[tokio::test]
    async fn test_line_format() {
        let file = write_temp("a.example.com\n\n  b.example.com  \n");
        let targets = FileProvider
            .provide(&ctx(), &source(file.path().to_str().unwrap(), json!({})), &[])
            .await
            .unwrap();
        let values: Vec<_> = targets.iter().map(|t| t.value.as_str()).collect();
        assert_eq!(values, vec!["a.example.com", "b.example.com"]);
    }

    #[tokio::test]
    async fn test_csv_named_column_uses_header() {
        let file = write_temp("host,port\na.example.com,80\nb.example.com,443\n");
        let targets = FileProvider
            .provide(
                &ctx(),
                &source(file.path().to_str().unwrap(), json!({"format": "csv", "column": "host"})),
                &[],
            )
            .await
            .unwrap();
        let values: Vec<_> = targets.iter().map(|t| t.value.as_str()).collect();
        assert_eq!(values, vec!["a.example.com", "b.example.com"]);
    }

    #[tokio::test]
    async fn test_csv_indexed_column_has_no_header() {
        let file = write_temp("a.example.com,80\nb.example.com,443\n");
        let targets = FileProvider
            .provide(
                &ctx(),
                &source(file.path().to_str().unwrap(), json!({"format": "csv", "column": 0})),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].value, "a.example.com");
    }

    #[tokio::test]
    async fn test_csv_missing_column_is_configuration_error() {
        let file = write_temp("host,port\na.example.com,80\n");
        let err = FileProvider
            .provide(
                &ctx(),
                &source(file.path().to_str().unwrap(), json!({"format": "csv", "column": "address"})),
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_json_array_of_strings() {
        let file = write_temp(r#"["a.example.com", " b.example.com ", ""]"#);
        let targets = FileProvider
            .provide(
                &ctx(),
                &source(file.path().to_str().unwrap(), json!({"format": "json_array"})),
                &[],
            )
            .await
            .unwrap();
        let values: Vec<_> = targets.iter().map(|t| t.value.as_str()).collect();
        assert_eq!(values, vec!["a.example.com", "b.example.com"]);
    }

    #[tokio::test]
    async fn test_json_array_of_objects_uses_last_path_segment() {
        let file = write_temp(r#"[{"asset": {"host": "x"}, "host": "a.example.com"}, {"host": "b.example.com"}]"#);
        let targets = FileProvider
            .provide(
                &ctx(),
                &source(
                    file.path().to_str().unwrap(),
                    json!({"format": "json_array", "json_path": "assets.host"}),
                ),
                &[],
            )
            .await
            .unwrap();
        let values: Vec<_> = targets.iter().map(|t| t.value.as_str()).collect();
        assert_eq!(values, vec!["a.example.com", "b.example.com"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_configuration_error() {
        // A vanished file is transient from the resolver's point of view:
        // the source is skipped, not the whole resolution.
        let err = FileProvider
            .provide(&ctx(), &source("/nonexistent/targets.txt", json!({})), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ValidationFailed(_)));
    }
}
