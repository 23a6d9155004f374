// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for hearth-host.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Host configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,
    /// Identifier of this node when several hosts share one database
    pub swarm_identifier: Option<String>,
    /// Game server executable launched for online instances
    pub server_command: PathBuf,
    /// Bounded wait for a graceful shutdown before force-terminating
    pub graceful_stop_timeout: Duration,
    /// Bounded wait for a single liveness probe
    pub probe_timeout: Duration,
    /// Number of probes attempted during attach-on-startup before declaring a crash
    pub attach_retries: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("HEARTH_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:hearth.db?mode=rwc".to_string());

        let swarm_identifier = std::env::var("HEARTH_SWARM_ID")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let server_command = std::env::var("HEARTH_SERVER_COMMAND")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::MissingEnvVar("HEARTH_SERVER_COMMAND"))?;

        let graceful_stop_timeout =
            Duration::from_secs(env_number("HEARTH_GRACEFUL_STOP_SECS", 10u64)?);
        let probe_timeout = Duration::from_secs(env_number("HEARTH_PROBE_TIMEOUT_SECS", 5u64)?);
        let attach_retries = env_number("HEARTH_ATTACH_RETRIES", 3u32)?.max(1);

        Ok(Self {
            database_url,
            swarm_identifier,
            server_command,
            graceful_stop_timeout,
            probe_timeout,
            attach_retries,
        })
    }
}

fn env_number<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    parse_number(var, std::env::var(var).ok().as_deref(), default)
}

/// Parse `raw` as `T`, rejecting values that do not fit instead of wrapping.
fn parse_number<T: FromStr>(
    var: &'static str,
    raw: Option<&str>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(v) => v.trim().parse().map_err(|_| ConfigError::InvalidNumber(var)),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A numeric environment variable could not be parsed.
    #[error("Invalid number in environment variable: {0}")]
    InvalidNumber(&'static str),
}
