//! Application configuration.
//!
//! Loaded from YAML files and environment variables with the `config` crate.

mod runtime;

pub use runtime::{
    RuntimeConfig, DEFAULT_MAX_CONCURRENT_INSTANCES, DEFAULT_MAX_MESSAGE_BYTES,
    DEFAULT_OUTBOUND_BUFFER, DEFAULT_PASSIVATION_TIMEOUT_MS, DEFAULT_PERSIST_ACK_TIMEOUT_MS,
    DEFAULT_SNAPSHOT_EVERY,
};

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::passivation::PassivationStrategy;
use crate::transport::TransportConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "ENTITY_RUNTIME_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "ENTITY_RUNTIME";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "ENTITY_RUNTIME_LOG";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transport configuration.
    pub transport: TransportConfig,
    /// Entity runtime configuration.
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let runtime = &self.runtime;
        if runtime.passivation_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "runtime.passivation_timeout_ms must be positive".to_string(),
            ));
        }
        if runtime.max_concurrent_instances == 0 {
            return Err(ConfigError::Invalid(
                "runtime.max_concurrent_instances must be positive".to_string(),
            ));
        }
        if runtime.max_concurrent_instances > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid(format!(
                "runtime.max_concurrent_instances must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if runtime.passivation_timeout() > PassivationStrategy::MAX_TIMEOUT
            || runtime.persist_ack_timeout() > PassivationStrategy::MAX_TIMEOUT
        {
            return Err(ConfigError::Invalid(format!(
                "runtime timeouts must not exceed {} ms",
                PassivationStrategy::MAX_TIMEOUT.as_millis()
            )));
        }
        if runtime.persist_ack_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "runtime.persist_ack_timeout_ms must be positive".to_string(),
            ));
        }
        if runtime.outbound_buffer == 0 {
            return Err(ConfigError::Invalid(
                "runtime.outbound_buffer must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
