//! Process-wide state shared by every resource router: configuration, the
//! audit recorder and the shutdown signal.

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditRecorder, AuditSink};
use crate::config::{validate, EngineConfig};
use crate::error::ConfigError;
use crate::model::Model;
use crate::service::{HookRegistry, Lifecycle};
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub audit: AuditRecorder,
    shutdown: CancellationToken,
    /// Background audit drain; present only in async mode.
    drain: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AppState {
    /// Validates `config` and builds the audit recorder it asks for. Async
    /// audit spawns its drain task, so this must run inside a Tokio runtime.
    pub fn new(config: EngineConfig, sink: Arc<dyn AuditSink>) -> Result<Self, ConfigError> {
        validate(&config)?;
        let shutdown = CancellationToken::new();
        let (audit, drain) = AuditRecorder::from_config(&config.audit, sink, shutdown.clone());
        tracing::info!(
            schema = %config.schema,
            audit_mode = ?config.audit.mode,
            include_reads = config.audit.include_reads,
            "engine state initialized"
        );
        Ok(AppState {
            config: Arc::new(config),
            audit,
            shutdown,
            drain: Arc::new(Mutex::new(drain)),
        })
    }

    pub fn without_audit(config: EngineConfig) -> Result<Self, ConfigError> {
        validate(&config)?;
        Ok(AppState {
            config: Arc::new(config),
            audit: AuditRecorder::disabled(),
            shutdown: CancellationToken::new(),
            drain: Arc::new(Mutex::new(None)),
        })
    }

    /// Lifecycle for `M` sharing this state's recorder and query defaults.
    pub fn lifecycle<M: Model>(&self, store: Arc<dyn Store<M>>, hooks: HookRegistry<M>) -> Lifecycle<M> {
        Lifecycle::new(store, hooks, self.audit.clone()).with_defaults(self.config.query_defaults())
    }

    /// Cancelled on shutdown; in-flight requests hold child tokens.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel in-flight work and wait for the audit drain to flush what is buffered.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = match self.drain.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "audit drain task failed");
            }
        }
        tracing::info!("engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::AuditMode;

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.default_page_size = 0;
        let sink = Arc::new(MemoryAuditSink::default());
        assert!(AppState::new(config, sink).is_err());
    }

    #[tokio::test]
    async fn shutdown_cancels_and_is_repeatable() {
        let mut config = EngineConfig::default();
        config.audit.mode = AuditMode::Async;
        let state = AppState::new(config, Arc::new(MemoryAuditSink::default())).unwrap();
        let token = state.shutdown_token();
        state.shutdown().await;
        assert!(token.is_cancelled());
        state.shutdown().await;
    }
}
