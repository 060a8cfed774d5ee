//! Per-resource router builder. Each operation is registered either in unified
//! mode or bound to a custom service; unregistered operations are not mounted.

use axum::{
    routing::{self, MethodRouter},
    Router,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::resource::{self as h, Dispatch, ResourceState};
use crate::model::{Model, Operation};
use crate::service::{custom_endpoint, CustomService, Lifecycle};
use crate::state::AppState;

pub struct ResourceRouter<M: Model> {
    lifecycle: Arc<Lifecycle<M>>,
    path: String,
    dispatch: HashMap<Operation, Dispatch>,
    body_limit: usize,
    shutdown: CancellationToken,
    timeout: Option<Duration>,
}

impl<M: Model> ResourceRouter<M> {
    /// Mounted at `/<table name>` with nothing registered yet.
    pub fn new(app: &AppState, lifecycle: Lifecycle<M>) -> Self {
        ResourceRouter {
            path: format!("/{}", M::table_name()),
            lifecycle: Arc::new(lifecycle),
            dispatch: HashMap::new(),
            body_limit: app.config.body_limit_bytes,
            shutdown: app.shutdown_token(),
            timeout: app.config.request_timeout(),
        }
    }

    pub fn path(mut self, path: &str) -> Self {
        let trimmed = path.trim_end_matches('/');
        self.path = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };
        self
    }

    pub fn unified(mut self, ops: &[Operation]) -> Self {
        for op in ops {
            self.dispatch.insert(*op, Dispatch::Unified);
        }
        self
    }

    /// Every CRUD operation in unified mode.
    pub fn all_unified(self) -> Self {
        self.unified(&Operation::ALL_CRUD)
    }

    /// Serve `op` with `service`; replaces any earlier registration for `op`.
    pub fn custom<Req, Rsp, S>(mut self, op: Operation, service: S) -> Self
    where
        S: CustomService<Req, Rsp> + 'static,
        Req: DeserializeOwned + Send + 'static,
        Rsp: Serialize + Send + 'static,
    {
        self.dispatch.insert(op, Dispatch::Custom(custom_endpoint(service)));
        self
    }

    pub fn body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    pub fn registered(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.dispatch.keys().copied().collect();
        ops.sort();
        ops
    }

    pub fn into_router(self) -> Router {
        let has = |op: Operation| self.dispatch.contains_key(&op);

        let mut collection: Option<MethodRouter<ResourceState<M>>> = None;
        let mut item: Option<MethodRouter<ResourceState<M>>> = None;
        let mut batch: Option<MethodRouter<ResourceState<M>>> = None;

        if has(Operation::Create) {
            mount(&mut collection, routing::post(h::create::<M>));
        }
        if has(Operation::List) {
            mount(&mut collection, routing::get(h::list::<M>));
        }
        if has(Operation::Delete) {
            mount(&mut collection, routing::delete(h::delete_ids::<M>));
            mount(&mut item, routing::delete(h::delete::<M>));
        }
        if has(Operation::Get) {
            mount(&mut item, routing::get(h::get::<M>));
        }
        if has(Operation::Update) {
            mount(&mut item, routing::put(h::update::<M>));
        }
        if has(Operation::Patch) {
            mount(&mut item, routing::patch(h::patch::<M>));
        }
        if has(Operation::CreateMany) {
            mount(&mut batch, routing::post(h::create_many::<M>));
        }
        if has(Operation::UpdateMany) {
            mount(&mut batch, routing::put(h::update_many::<M>));
        }
        if has(Operation::PatchMany) {
            mount(&mut batch, routing::patch(h::patch_many::<M>));
        }
        if has(Operation::DeleteMany) {
            mount(&mut batch, routing::delete(h::delete_many::<M>));
        }

        tracing::info!(
            resource = self.lifecycle.resource(),
            path = %self.path,
            operations = ?self.registered(),
            "resource routes mounted"
        );

        let mut router: Router<ResourceState<M>> = Router::new();
        if let Some(m) = collection {
            router = router.route(&self.path, m);
        }
        if let Some(m) = batch {
            router = router.route(&format!("{}/batch", self.path), m);
        }
        if let Some(m) = item {
            router = router.route(&format!("{}/:id", self.path), m);
        }

        let state = ResourceState {
            lifecycle: self.lifecycle,
            dispatch: Arc::new(self.dispatch),
            shutdown: self.shutdown,
            timeout: self.timeout,
        };
        router
            .layer(RequestBodyLimitLayer::new(self.body_limit))
            .with_state(state)
    }
}

fn mount<S>(slot: &mut Option<MethodRouter<S>>, route: MethodRouter<S>)
where
    S: Clone + Send + Sync + 'static,
{
    *slot = Some(match slot.take() {
        Some(existing) => existing.merge(route),
        None => route,
    });
}
