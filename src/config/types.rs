//! Engine configuration types. Every field has a default so partial JSON and
//! partially-set environments both load.

use serde::{Deserialize, Serialize};

use crate::query::QueryDefaults;

/// How audit records reach the sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    Off,
    /// Direct write on the request path.
    Sync,
    /// Bounded ring buffer drained by a background task.
    #[default]
    Async,
}

impl std::str::FromStr for AuditMode {
    type Err = crate::error::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "none" | "disabled" => Ok(AuditMode::Off),
            "sync" => Ok(AuditMode::Sync),
            "async" => Ok(AuditMode::Async),
            other => Err(crate::error::ConfigError::Validation(format!(
                "invalid audit mode: {} (expected off, sync or async)",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub mode: AuditMode,
    /// Ring buffer capacity (async mode). Fixed for the process lifetime.
    pub capacity: usize,
    /// Drain tick of the background consumer.
    pub drain_interval_ms: u64,
    /// Max records written per sink call.
    pub batch_size: usize,
    /// Record List/Get as well as mutations.
    pub include_reads: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            mode: AuditMode::Async,
            capacity: 4096,
            drain_interval_ms: 1000,
            batch_size: 256,
            include_reads: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// PostgreSQL schema for resource document tables and the audit log.
    pub schema: String,
    /// Page size applied when `size` is absent or malformed.
    pub default_page_size: u32,
    /// Per-request deadline applied to every hook and storage step.
    pub request_timeout_ms: Option<u64>,
    pub body_limit_bytes: usize,
    pub audit: AuditConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            schema: "lifecycle".into(),
            default_page_size: crate::query::DEFAULT_PAGE_SIZE,
            request_timeout_ms: None,
            body_limit_bytes: 2 * 1024 * 1024,
            audit: AuditConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn query_defaults(&self) -> QueryDefaults {
        QueryDefaults {
            page_size: self.default_page_size,
        }
    }

    pub fn request_timeout(&self) -> Option<std::time::Duration> {
        self.request_timeout_ms.map(std::time::Duration::from_millis)
    }
}
