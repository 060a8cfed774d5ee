//! Example consumer: a `task` resource served by lifecycle-sdk.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! With `DATABASE_URL` set, tasks and audit records go to PostgreSQL;
//! otherwise everything stays in memory.

use async_trait::async_trait;
use lifecycle_sdk::{
    common_routes, field, init_tracing, AppError, AppState, AuditSink, Base, CustomService, EngineConfig,
    FieldSpec, HookError, HookRegistry, Hooks, MemoryAuditSink, MemoryStore, Model, Operation, PgAuditSink,
    PgStore, QueryDescriptor, ResourceRouter, ServiceContext, Store,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Task {
    #[serde(flatten)]
    base: Base,
    title: String,
    status: String,
    priority: u32,
}

impl Model for Task {
    fn resource_name() -> &'static str {
        "task"
    }

    fn fields() -> Vec<FieldSpec<Self>> {
        vec![field!(Task, title), field!(Task, status), field!(Task, priority)]
    }

    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
}

/// Rejects untitled tasks and defaults the status.
struct TaskRules;

#[async_trait]
impl Hooks<Task> for TaskRules {
    async fn before(&self, _ctx: &mut ServiceContext, task: &mut Task) -> Result<(), AppError> {
        if task.title.trim().is_empty() {
            return Err(HookError::new("title is required").with_code(4001).into());
        }
        if task.status.is_empty() {
            task.status = "open".into();
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct CloseRequest {
    id: String,
}

#[derive(Serialize)]
struct CloseResponse {
    id: String,
    status: &'static str,
}

/// PATCH /task/:id served by hand: closes the task whatever the body says.
struct CloseTask {
    store: Arc<dyn Store<Task>>,
}

#[async_trait]
impl CustomService<CloseRequest, CloseResponse> for CloseTask {
    async fn handle(&self, ctx: &mut ServiceContext, req: CloseRequest) -> Result<CloseResponse, AppError> {
        let mut task = self
            .store
            .get(&req.id, &QueryDescriptor::default())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {}", req.id)))?;
        task.status = "closed".into();
        task.set_updated_by(ctx.actor());
        self.store.update(&[task], true).await?;
        Ok(CloseResponse {
            id: req.id,
            status: "closed",
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("lifecycle_sdk=info,example_consumer=info");
    let config = EngineConfig::from_env()?;

    let (store, sink): (Arc<dyn Store<Task>>, Arc<dyn AuditSink>) = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(&url)
                .await?;
            (
                Arc::new(PgStore::<Task>::new(pool.clone(), &config.schema).await?),
                Arc::new(PgAuditSink::new(pool, &config.schema).await?),
            )
        }
        Err(_) => {
            tracing::info!("DATABASE_URL not set, using in-memory storage");
            (Arc::new(MemoryStore::<Task>::new()), Arc::new(MemoryAuditSink::new()))
        }
    };

    let state = AppState::new(config, sink)?;
    let hooks = HookRegistry::with_default(Arc::new(TaskRules));
    let tasks = ResourceRouter::new(&state, state.lifecycle(store.clone(), hooks))
        .all_unified()
        .custom(Operation::Patch, CloseTask { store })
        .into_router();

    let app = common_routes().merge(tasks);
    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("example consumer listening on http://{}", listener.local_addr()?);

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_state.shutdown().await;
        })
        .await?;
    Ok(())
}
