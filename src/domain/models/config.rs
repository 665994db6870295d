//! Runtime configuration model.
//!
//! Loaded hierarchically by the config loader (defaults, YAML file,
//! environment overrides) and validated before the daemon starts.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub dispatch: DispatchConfig,
    pub ingest: IngestConfig,
    pub logging: LoggingConfig,
}

/// SQLite storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL, e.g. `sqlite:scanforge.db`.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:scanforge.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Scheduler control-loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between ticks.
    pub tick_interval_secs: u64,
    /// Upper bound on pending tasks dispatched per tick.
    pub dispatch_batch: usize,
    /// Per-project processing deadline within one tick, seconds.
    pub project_deadline_secs: u64,
    /// Concurrent per-project workers within one tick.
    pub project_concurrency: usize,
    /// Ticks a task may sit pending before it is flagged as stuck.
    pub stuck_after_ticks: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            dispatch_batch: 200,
            project_deadline_secs: 60,
            project_concurrency: 4,
            stuck_after_ticks: 30,
        }
    }
}

/// Outbound dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum task deliveries per second across all agents (0 = unlimited).
    pub rate_per_second: u32,
    /// Concurrent in-flight deliveries.
    pub concurrency: usize,
    /// Base URL agents are reached under, e.g. `http://agent-gw:8480`.
    pub agent_base_url: String,
    /// Per-request transport timeout, seconds.
    pub request_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 50,
            concurrency: 16,
            agent_base_url: "http://127.0.0.1:8480".to_string(),
            request_timeout_secs: 15,
        }
    }
}

/// Result-ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Capacity of the bounded queue feeding the ETL consumer. A full
    /// queue pushes back on agents (they retry with backoff).
    pub queue_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { queue_capacity: 1024 }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// json | pretty
    pub format: String,
    /// Optional log file path; stdout when absent.
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.scheduler.tick_interval_secs, 10);
        assert!(config.ingest.queue_capacity > 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_yaml_overlays_defaults() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "scheduler": {"tick_interval_secs": 2}
        }))
        .unwrap();
        assert_eq!(config.scheduler.tick_interval_secs, 2);
        assert_eq!(config.scheduler.dispatch_batch, 200);
    }
}
