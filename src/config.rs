//! Configuration loading from environment variables.
//!
//! Uses the following environment variables:
//! - `RUNSWEEP_DATABASE_URL`: PostgreSQL connection string (required)
//! - `RUNSWEEP_SWEEP_INTERVAL_MS`: Sweep interval (default: 60000)
//! - `RUNSWEEP_TARGET_TIMEOUT_MINUTES`: Age after which a non-terminal target is canceled (default: 180)
//! - `RUNSWEEP_EXECUTOR_TIMEOUT_MINUTES`: Minimum age before an executor is finalized (default: 15)
//! - `RUNSWEEP_RUN_TIMEOUT_MINUTES`: Minimum age before a run is finalized (default: 15)

use std::env;

use anyhow::{Context, Result};

/// Sweeper configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Sweep interval in milliseconds
    pub sweep_interval_ms: u64,

    /// Age in minutes after which a non-terminal target is force-canceled
    pub target_timeout_minutes: u32,

    /// Minimum age in minutes before an executor may be finalized
    pub executor_timeout_minutes: u32,

    /// Minimum age in minutes before a run may be finalized
    pub run_timeout_minutes: u32,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Loads `.env` file if present, then reads from environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("RUNSWEEP_DATABASE_URL")
            .context("RUNSWEEP_DATABASE_URL environment variable is required")?;

        let sweep_interval_ms = env::var("RUNSWEEP_SWEEP_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60_000);

        let target_timeout_minutes = env::var("RUNSWEEP_TARGET_TIMEOUT_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(180);

        let executor_timeout_minutes = env::var("RUNSWEEP_EXECUTOR_TIMEOUT_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);

        let run_timeout_minutes = env::var("RUNSWEEP_RUN_TIMEOUT_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);

        Ok(Self {
            database_url,
            sweep_interval_ms,
            target_timeout_minutes,
            executor_timeout_minutes,
            run_timeout_minutes,
        })
    }

    /// Create a test configuration with defaults
    #[cfg(test)]
    pub fn test_config(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            sweep_interval_ms: 1_000,
            target_timeout_minutes: 180,
            executor_timeout_minutes: 15,
            run_timeout_minutes: 15,
        }
    }
}
