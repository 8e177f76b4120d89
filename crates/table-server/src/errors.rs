//! Table server error types.
//!
//! Almost every failure in the core is handled where it is detected (timed-out
//! waits, empty pops, cohorts discarded during shutdown). The variants here are
//! the ones that cross a boundary: startup failures returned from lifecycle
//! `start()` and transport-level failures that are logged per connection.

use thiserror::Error;

use crate::config::ConfigError;

/// Table server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The transport could not bind its listener. Fatal at startup.
    #[error("Failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// WebSocket or HTTP transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Outbound message could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The server is shutting down and refuses new work.
    #[error("Server is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true for errors that must abort process startup.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServerError::Bind { .. } | ServerError::Config(_))
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        ServerError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Serialization(err.to_string())
    }
}
