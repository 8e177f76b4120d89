//! Common configuration types for card table components.

use serde::{Deserialize, Serialize};

/// Default log level when neither `RUST_LOG` nor an explicit level is set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// Builds the default `EnvFilter` directive for every target starting
    /// with `target_prefix`, e.g. `table=info,tower_http=info`.
    #[must_use]
    pub fn filter_directive(&self, target_prefix: &str) -> String {
        format!(
            "{target_prefix}={level},tower_http={level}",
            level = self.log_level
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_observability_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(!config.json_logs);
    }

    #[test]
    fn test_filter_directive() {
        let config = ObservabilityConfig {
            log_level: "debug".to_string(),
            json_logs: true,
        };
        assert_eq!(
            config.filter_directive("table"),
            "table=debug,tower_http=debug"
        );
    }
}
