//! Config validation: reject settings the engine cannot run with.

use crate::config::{AuditMode, EngineConfig};
use crate::error::ConfigError;

pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.default_page_size == 0 {
        return Err(ConfigError::Validation("default_page_size must be > 0".into()));
    }
    if config.schema.trim().is_empty() {
        return Err(ConfigError::Validation("schema must not be empty".into()));
    }
    if !config
        .schema
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "schema '{}' is not a plain identifier",
            config.schema
        )));
    }
    if config.audit.mode == AuditMode::Async {
        if config.audit.capacity == 0 {
            return Err(ConfigError::Validation("audit.capacity must be > 0 in async mode".into()));
        }
        if config.audit.drain_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "audit.drain_interval_ms must be > 0 in async mode".into(),
            ));
        }
        if config.audit.batch_size == 0 {
            return Err(ConfigError::Validation("audit.batch_size must be > 0 in async mode".into()));
        }
    }
    Ok(())
}
