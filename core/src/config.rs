//! Configuration management for the WareBill billing core
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with WAREBILL_ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Cost-calculation trigger queue configuration
    pub trigger: TriggerConfig,

    /// Weekly snapshot worker configuration
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TriggerConfig {
    /// Retries before a cost job is dropped
    pub max_retries: u32,

    /// Base backoff in milliseconds; attempt N waits N times this value
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    /// Seconds between snapshot catch-up runs in the worker binary
    pub catchup_interval_secs: u64,

    /// Recent Mondays always recomputed during catch-up to absorb
    /// late-arriving transactions
    pub recompute_trailing_weeks: u32,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("WAREBILL_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("trigger.max_retries", 3)?
            .set_default("trigger.retry_delay_ms", 1000)?
            .set_default("snapshot.catchup_interval_secs", 3600)?
            .set_default("snapshot.recompute_trailing_weeks", 2)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (WAREBILL_ prefix)
            .add_source(
                Environment::with_prefix("WAREBILL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
