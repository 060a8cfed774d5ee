//! Shared fixtures for the HTTP integration tests.
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use lifecycle_sdk::{
    field, AppState, AuditMode, Base, EngineConfig, FieldSpec, HookRegistry, MemoryAuditSink, MemoryStore,
    Model, ResourceRouter,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    #[serde(flatten)]
    pub base: Base,
    pub name: String,
    pub email: String,
    pub age: u32,
}

impl Model for User {
    fn resource_name() -> &'static str {
        "user"
    }

    fn fields() -> Vec<FieldSpec<Self>> {
        vec![field!(User, name), field!(User, email), field!(User, age)]
    }

    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
}

pub fn user(id: &str, name: &str, email: &str) -> User {
    let mut u = User {
        name: name.into(),
        email: email.into(),
        ..Default::default()
    };
    u.base.id = id.into();
    u
}

/// Everything a test needs to inspect after a request.
pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore<User>>,
    pub sink: Arc<MemoryAuditSink>,
}

impl Harness {
    pub fn new(rows: Vec<User>) -> Self {
        let mut config = EngineConfig::default();
        config.audit.mode = AuditMode::Sync;
        let sink = Arc::new(MemoryAuditSink::new());
        let state = AppState::new(config, sink.clone()).unwrap();
        Harness {
            state,
            store: Arc::new(MemoryStore::with_rows(rows)),
            sink,
        }
    }

    pub fn router(&self, hooks: HookRegistry<User>) -> ResourceRouter<User> {
        ResourceRouter::new(&self.state, self.state.lifecycle(self.store.clone(), hooks))
    }

    pub fn unified(&self) -> Router {
        self.router(HookRegistry::new()).all_unified().into_router()
    }
}

pub async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(v) => Body::from(serde_json::to_vec(&v).unwrap()),
        None => Body::empty(),
    };
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("X-Actor", "alice")
        .body(body)
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
