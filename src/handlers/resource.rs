//! HTTP dispatch: one request -> one orchestrated operation, unified or custom.

use axum::{
    body::Bytes,
    extract::{Path, State},
    response::Response,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{field::Empty, Instrument};

use crate::error::AppError;
use crate::extractors::RequestMeta;
use crate::model::{BatchEnvelope, Model, Operation};
use crate::response::{success_created, success_ok};
use crate::service::{query_ids, CustomEndpoint, DispatchMode, Lifecycle, ServiceContext};

/// What serves one operation.
#[derive(Clone)]
pub enum Dispatch {
    Unified,
    Custom(Arc<dyn CustomEndpoint>),
}

impl Dispatch {
    pub fn mode(&self) -> DispatchMode {
        match self {
            Dispatch::Unified => DispatchMode::Unified,
            Dispatch::Custom(_) => DispatchMode::Custom,
        }
    }
}

/// Router state for one resource type.
pub struct ResourceState<M: Model> {
    pub lifecycle: Arc<Lifecycle<M>>,
    pub dispatch: Arc<HashMap<Operation, Dispatch>>,
    pub shutdown: CancellationToken,
    pub timeout: Option<Duration>,
}

impl<M: Model> Clone for ResourceState<M> {
    fn clone(&self) -> Self {
        ResourceState {
            lifecycle: self.lifecycle.clone(),
            dispatch: self.dispatch.clone(),
            shutdown: self.shutdown.clone(),
            timeout: self.timeout,
        }
    }
}

impl<M: Model> ResourceState<M> {
    fn context(&self, op: Operation, meta: RequestMeta, route_id: Option<String>) -> ServiceContext {
        let mut ctx = ServiceContext::new(op, meta).with_cancel(self.shutdown.child_token());
        if let Some(id) = route_id {
            ctx = ctx.with_route_id(id);
        }
        if let Some(timeout) = self.timeout {
            ctx = ctx.with_timeout(timeout);
        }
        ctx
    }
}

fn parse_body(body: &Bytes) -> Result<Value, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| AppError::Validation(format!("invalid JSON body: {}", e)))
}

fn bind<T: DeserializeOwned>(value: Value) -> Result<T, AppError> {
    if value.is_null() {
        return Err(AppError::Validation("request body required".into()));
    }
    serde_json::from_value(value).map_err(|e| AppError::Validation(format!("invalid request body: {}", e)))
}

#[derive(Deserialize)]
struct IdList {
    #[serde(default)]
    ids: Vec<String>,
}

/// Delete bodies: nothing, `["a","b"]`, or `{"ids": [...]}`.
fn body_ids(value: Value) -> Result<Vec<String>, AppError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => serde_json::from_value(value)
            .map_err(|e| AppError::Validation(format!("invalid id list: {}", e))),
        other => Ok(bind::<IdList>(other)?.ids),
    }
}

/// Query pairs as a JSON object; repeated keys collect into arrays.
fn query_object(pairs: &[(String, String)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        let v = Value::String(v.clone());
        match map.get_mut(k) {
            Some(Value::Array(values)) => values.push(v),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, v]);
            }
            None => {
                map.insert(k.clone(), v);
            }
        }
    }
    map
}

fn custom_input(op: Operation, meta: &RequestMeta, route_id: Option<&str>, body: Value) -> Value {
    let mut input = if op.is_read() {
        Value::Object(query_object(&meta.query_pairs()))
    } else {
        body
    };
    if let Some(id) = route_id {
        if input.is_null() {
            input = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut input {
            map.entry("id").or_insert_with(|| Value::String(id.to_string()));
        }
    }
    input
}

async fn dispatch<M: Model>(
    state: ResourceState<M>,
    op: Operation,
    meta: RequestMeta,
    route_id: Option<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let span = tracing::info_span!(
        "request",
        request_id = %meta.request_id,
        method = %meta.method,
        path = %meta.path,
        operation = %op,
        resource = state.lifecycle.resource(),
        mode = Empty,
    );
    async move {
        let Some(handler) = state.dispatch.get(&op).cloned() else {
            return Err(AppError::NotFound(format!("operation {} not registered", op)));
        };
        tracing::Span::current().record("mode", handler.mode().as_str());

        let body = parse_body(&body)?;
        let lifecycle = state.lifecycle.clone();
        let pairs = meta.query_pairs();
        let input = match &handler {
            Dispatch::Custom(_) => custom_input(op, &meta, route_id.as_deref(), body),
            Dispatch::Unified => body,
        };
        let mut ctx = state.context(op, meta, route_id);

        let response = match handler {
            Dispatch::Custom(endpoint) => {
                let out = lifecycle.call_custom(&mut ctx, endpoint.as_ref(), input).await?;
                respond(op, out)
            }
            Dispatch::Unified => match op {
                Operation::Create => success_created(lifecycle.create(&mut ctx, bind(input)?).await?),
                Operation::Update => success_ok(lifecycle.update(&mut ctx, bind(input)?).await?),
                Operation::Patch => success_ok(lifecycle.patch(&mut ctx, bind(input)?).await?),
                Operation::Delete => {
                    let removed = lifecycle.delete(&mut ctx, &query_ids(&pairs), &body_ids(input)?).await?;
                    success_ok(removed)
                }
                Operation::List => {
                    let query = lifecycle.resolve_query(&pairs);
                    success_ok(lifecycle.list(&mut ctx, query).await?)
                }
                Operation::Get => {
                    let query = lifecycle.resolve_query(&pairs);
                    success_ok(lifecycle.get(&mut ctx, query).await?)
                }
                Operation::CreateMany => {
                    success_created(lifecycle.create_many(&mut ctx, bind::<BatchEnvelope<M>>(input)?).await?)
                }
                Operation::UpdateMany => {
                    success_ok(lifecycle.update_many(&mut ctx, bind::<BatchEnvelope<M>>(input)?).await?)
                }
                Operation::PatchMany => {
                    success_ok(lifecycle.patch_many(&mut ctx, bind::<BatchEnvelope<M>>(input)?).await?)
                }
                Operation::DeleteMany => {
                    success_ok(lifecycle.delete_many(&mut ctx, bind::<BatchEnvelope<M>>(input)?).await?)
                }
                Operation::Import | Operation::Export => {
                    return Err(AppError::Validation(format!("{} has no unified implementation", op)));
                }
            },
        };
        tracing::debug!("request completed");
        Ok(response)
    }
    .instrument(span)
    .await
}

fn respond(op: Operation, data: Value) -> Response {
    match op {
        Operation::Create | Operation::CreateMany => success_created(data),
        _ => success_ok(data),
    }
}

pub async fn create<M: Model>(
    State(state): State<ResourceState<M>>,
    meta: RequestMeta,
    body: Bytes,
) -> Result<Response, AppError> {
    dispatch(state, Operation::Create, meta, None, body).await
}

pub async fn list<M: Model>(State(state): State<ResourceState<M>>, meta: RequestMeta) -> Result<Response, AppError> {
    dispatch(state, Operation::List, meta, None, Bytes::new()).await
}

/// Collection-level delete: ids from the query string and/or the body.
pub async fn delete_ids<M: Model>(
    State(state): State<ResourceState<M>>,
    meta: RequestMeta,
    body: Bytes,
) -> Result<Response, AppError> {
    dispatch(state, Operation::Delete, meta, None, body).await
}

pub async fn get<M: Model>(
    State(state): State<ResourceState<M>>,
    meta: RequestMeta,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    dispatch(state, Operation::Get, meta, Some(id), Bytes::new()).await
}

pub async fn update<M: Model>(
    State(state): State<ResourceState<M>>,
    meta: RequestMeta,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    dispatch(state, Operation::Update, meta, Some(id), body).await
}

pub async fn patch<M: Model>(
    State(state): State<ResourceState<M>>,
    meta: RequestMeta,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    dispatch(state, Operation::Patch, meta, Some(id), body).await
}

pub async fn delete<M: Model>(
    State(state): State<ResourceState<M>>,
    meta: RequestMeta,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    dispatch(state, Operation::Delete, meta, Some(id), body).await
}

pub async fn create_many<M: Model>(
    State(state): State<ResourceState<M>>,
    meta: RequestMeta,
    body: Bytes,
) -> Result<Response, AppError> {
    dispatch(state, Operation::CreateMany, meta, None, body).await
}

pub async fn update_many<M: Model>(
    State(state): State<ResourceState<M>>,
    meta: RequestMeta,
    body: Bytes,
) -> Result<Response, AppError> {
    dispatch(state, Operation::UpdateMany, meta, None, body).await
}

pub async fn patch_many<M: Model>(
    State(state): State<ResourceState<M>>,
    meta: RequestMeta,
    body: Bytes,
) -> Result<Response, AppError> {
    dispatch(state, Operation::PatchMany, meta, None, body).await
}

pub async fn delete_many<M: Model>(
    State(state): State<ResourceState<M>>,
    meta: RequestMeta,
    body: Bytes,
) -> Result<Response, AppError> {
    dispatch(state, Operation::DeleteMany, meta, None, body).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_body_shapes() {
        assert!(body_ids(Value::Null).unwrap().is_empty());
        assert_eq!(body_ids(serde_json::json!(["a", "b"])).unwrap(), vec!["a", "b"]);
        assert_eq!(body_ids(serde_json::json!({"ids": ["c"]})).unwrap(), vec!["c"]);
        assert!(body_ids(serde_json::json!([1])).is_err());
    }

    #[test]
    fn repeated_query_keys_become_arrays() {
        let pairs = vec![
            ("tag".to_string(), "a".to_string()),
            ("q".to_string(), "x".to_string()),
            ("tag".to_string(), "b".to_string()),
            ("tag".to_string(), "c".to_string()),
        ];
        let obj = query_object(&pairs);
        assert_eq!(obj["q"], "x");
        assert_eq!(obj["tag"], serde_json::json!(["a", "b", "c"]));
    }

    #[test]
    fn blank_body_is_null() {
        assert!(parse_body(&Bytes::from_static(b"  \n")).unwrap().is_null());
        assert!(matches!(parse_body(&Bytes::from_static(b"{oops")), Err(AppError::Validation(_))));
    }
}
