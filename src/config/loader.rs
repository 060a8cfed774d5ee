//! Load engine config from the environment (`LIFECYCLE_*`, `.env` honoured) or JSON.

use crate::config::types::{AuditMode, EngineConfig};
use crate::config::validate;
use crate::error::ConfigError;

pub const ENV_PREFIX: &str = "LIFECYCLE_";

fn env(key: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, key))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Load(format!("{}{}: cannot parse '{}'", ENV_PREFIX, key, raw))),
        None => Ok(None),
    }
}

impl EngineConfig {
    /// Defaults overridden by `LIFECYCLE_*` variables, then validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = EngineConfig::default();
        if let Some(schema) = env("SCHEMA") {
            config.schema = schema;
        }
        if let Some(n) = env_parse("DEFAULT_PAGE_SIZE")? {
            config.default_page_size = n;
        }
        if let Some(ms) = env_parse("REQUEST_TIMEOUT_MS")? {
            config.request_timeout_ms = Some(ms);
        }
        if let Some(n) = env_parse("BODY_LIMIT_BYTES")? {
            config.body_limit_bytes = n;
        }
        if let Some(mode) = env("AUDIT_MODE") {
            config.audit.mode = mode.parse::<AuditMode>()?;
        }
        if let Some(n) = env_parse("AUDIT_CAPACITY")? {
            config.audit.capacity = n;
        }
        if let Some(ms) = env_parse("AUDIT_INTERVAL_MS")? {
            config.audit.drain_interval_ms = ms;
        }
        if let Some(n) = env_parse("AUDIT_BATCH_SIZE")? {
            config.audit.batch_size = n;
        }
        if let Some(b) = env_parse("AUDIT_READS")? {
            config.audit.include_reads = b;
        }
        validate(&config)?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            serde_json::from_str(raw).map_err(|e| ConfigError::Load(e.to_string()))?;
        validate(&config)?;
        Ok(config)
    }
}
