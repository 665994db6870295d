//! Hierarchical configuration loading.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database URL cannot be empty")]
    EmptyDatabaseUrl,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid tick interval: {0}. Must be at least 1 second")]
    InvalidTickInterval(u64),

    #[error("Invalid dispatch batch: {0}. Must be at least 1")]
    InvalidDispatchBatch(usize),

    #[error("Invalid ingest queue capacity: {0}. Must be at least 1")]
    InvalidQueueCapacity(usize),

    #[error("Agent base URL cannot be empty")]
    EmptyAgentBaseUrl,
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `scanforge.yaml` in the working directory
    /// 3. Environment variables (`SCANFORGE_*`, `__` as section separator)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("scanforge.yaml"))
            .merge(Env::prefixed("SCANFORGE_").split("__"))
            .extract()
            .context("Failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("SCANFORGE_").split("__"))
            .extract()
            .context(format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.url.is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        if config.scheduler.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidTickInterval(config.scheduler.tick_interval_secs));
        }
        if config.scheduler.dispatch_batch == 0 {
            return Err(ConfigError::InvalidDispatchBatch(config.scheduler.dispatch_batch));
        }

        if config.ingest.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity(config.ingest.queue_capacity));
        }

        if config.dispatch.agent_base_url.is_empty() {
            return Err(ConfigError::EmptyAgentBaseUrl);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}
