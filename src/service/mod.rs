//! Lifecycle orchestration: per-call context, hooks, partial-update merge,
//! identifier collection and the unified-mode pipeline.

mod context;
mod differ;
mod hooks;
mod ids;
mod lifecycle;

pub use context::{Guard, ServiceContext};
pub use differ::merge;
pub use hooks::{custom_endpoint, CustomEndpoint, CustomService, HookRegistry, Hooks, NoopHooks};
pub use ids::{collect_ids, query_ids, resolve_single_id};
pub use lifecycle::{DispatchMode, Lifecycle};
