//! Table server configuration.
//!
//! Configuration is loaded from environment variables. Every value has a
//! default matching the server's built-in constants, so an empty environment
//! yields a working local server on `127.0.0.1:8008` seating three players
//! per session.

use common::config::{ObservabilityConfig, DEFAULT_LOG_LEVEL};
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default listen address for the WebSocket and HTTP endpoints.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8008";

/// Default number of participants seated in one session.
pub const DEFAULT_PLAYERS_PER_SESSION: usize = 3;

/// Default cap on concurrently open transport connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Default bound on a single matchmaker wait on the waiting room.
pub const DEFAULT_MATCHMAKER_POLL_MS: u64 = 1000;

/// Default interval between a session's closed-member / force-finish checks.
pub const DEFAULT_SESSION_CHECK_INTERVAL_MS: u64 = 500;

/// Default number of rules-engine turns before the placeholder game concludes.
pub const DEFAULT_SESSION_TURNS: u32 = 20;

/// Default bound on joining worker tasks during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 5;

/// Table server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for `/ws`, `/health`, `/ready` and `/metrics`.
    pub bind_address: SocketAddr,

    /// Cohort size `N`.
    pub players_per_session: usize,

    /// Maximum concurrently open connections; further upgrades get 503.
    pub max_connections: usize,

    /// Bound on one `wait_pop` in the matchmaker loop.
    pub matchmaker_poll_interval: Duration,

    /// Interval at which a session checks for closed members and force-finish.
    pub session_check_interval: Duration,

    /// Turns played by the placeholder rules engine before concluding.
    pub session_turns: u32,

    /// Bound on joining the matchmaker, session tasks and HTTP server at shutdown.
    pub shutdown_timeout: Duration,

    /// Logging configuration.
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8008)),
            players_per_session: DEFAULT_PLAYERS_PER_SESSION,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            matchmaker_poll_interval: Duration::from_millis(DEFAULT_MATCHMAKER_POLL_MS),
            session_check_interval: Duration::from_millis(DEFAULT_SESSION_CHECK_INTERVAL_MS),
            session_turns: DEFAULT_SESSION_TURNS,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECONDS),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = parse_or(
            vars,
            "TABLE_BIND_ADDRESS",
            SocketAddr::from_str(DEFAULT_BIND_ADDRESS)
                .map_err(|e| ConfigError::InvalidValue(format!("default bind address: {e}")))?,
        )?;

        let players_per_session =
            parse_or(vars, "TABLE_PLAYERS_PER_SESSION", DEFAULT_PLAYERS_PER_SESSION)?;
        if players_per_session == 0 {
            return Err(ConfigError::InvalidValue(
                "TABLE_PLAYERS_PER_SESSION must be at least 1".to_string(),
            ));
        }

        let max_connections = parse_or(vars, "TABLE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        if max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "TABLE_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }

        let matchmaker_poll_ms =
            parse_or(vars, "TABLE_MATCHMAKER_POLL_MS", DEFAULT_MATCHMAKER_POLL_MS)?;
        let session_check_interval_ms = parse_or(
            vars,
            "TABLE_SESSION_CHECK_INTERVAL_MS",
            DEFAULT_SESSION_CHECK_INTERVAL_MS,
        )?;
        // Both bound a wait that must stay responsive to shutdown.
        if matchmaker_poll_ms == 0 || session_check_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "TABLE_MATCHMAKER_POLL_MS and TABLE_SESSION_CHECK_INTERVAL_MS must be at least 1"
                    .to_string(),
            ));
        }

        let session_turns = parse_or(vars, "TABLE_SESSION_TURNS", DEFAULT_SESSION_TURNS)?;

        let shutdown_timeout_seconds = parse_or(
            vars,
            "TABLE_SHUTDOWN_TIMEOUT_SECONDS",
            DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
        )?;

        let log_level = vars
            .get("TABLE_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let json_logs = parse_or(vars, "TABLE_JSON_LOGS", false)?;

        Ok(Config {
            bind_address,
            players_per_session,
            max_connections,
            matchmaker_poll_interval: Duration::from_millis(matchmaker_poll_ms),
            session_check_interval: Duration::from_millis(session_check_interval_ms),
            session_turns,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_seconds),
            observability: ObservabilityConfig {
                log_level,
                json_logs,
            },
        })
    }
}

/// Parses `key` when present, falls back to `default` when absent.
fn parse_or<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("{key}={raw}: {e}"))),
        None => Ok(default),
    }
}
