//! Lifecycle SDK: typed resource pipelines (hooks, partial updates, query
//! resolution, auditing) served over axum and backed by PostgreSQL.

pub mod audit;
pub mod case;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod model;
pub mod query;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use audit::{AuditRecord, AuditRecorder, AuditSink, MemoryAuditSink, PgAuditSink};
pub use config::{AuditConfig, AuditMode, EngineConfig};
pub use error::{AppError, AuditError, Code, ConfigError, HookError, StoreError};
pub use extractors::RequestMeta;
pub use model::{stub, Base, BatchEnvelope, BatchOptions, BatchSummary, FieldSpec, Model, Operation, Phase, Schema};
pub use query::{resolve_query, QueryDefaults, QueryDescriptor};
pub use response::{Envelope, ListPage};
pub use routes::{common_routes, ResourceRouter};
pub use service::{
    CustomService, DispatchMode, HookRegistry, Hooks, Lifecycle, NoopHooks, ServiceContext,
};
pub use state::AppState;
pub use store::{MemoryStore, PgStore, Store};
pub use telemetry::init_tracing;
