//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.pool_size > 1024 {
            return Err(ConfigError::ValidationError(
                "workers.pool_size must be <= 1024 (0 means auto)".into(),
            ));
        }
        if self.workers.queue_depth == 0 {
            return Err(ConfigError::ValidationError(
                "workers.queue_depth must be > 0".into(),
            ));
        }
        if self.limits.max_file_size_mb == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_file_size_mb must be > 0".into(),
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of {:?}",
                LOG_LEVELS
            )));
        }
        Ok(())
    }
}
