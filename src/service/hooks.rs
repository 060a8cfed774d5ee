//! Business hooks (unified mode) and opaque per-operation services (custom mode).

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use super::ServiceContext;
use crate::error::AppError;
use crate::model::{Model, Operation};

/// Per-phase callbacks around the persistence step. Every method defaults to a
/// no-op, so an empty `impl Hooks<M> for X {}` is valid.
///
/// Create, Update, Patch and Get call `before`/`after`. Delete, List and the
/// batch operations call the `_many` variants; List hooks see an empty vector
/// before the read and adjust the query through
/// [`ServiceContext::query_mut`] instead.
#[async_trait]
pub trait Hooks<M: Model>: Send + Sync {
    async fn before(&self, _ctx: &mut ServiceContext, _item: &mut M) -> Result<(), AppError> {
        Ok(())
    }

    async fn after(&self, _ctx: &mut ServiceContext, _item: &mut M) -> Result<(), AppError> {
        Ok(())
    }

    async fn before_many(&self, _ctx: &mut ServiceContext, _items: &mut Vec<M>) -> Result<(), AppError> {
        Ok(())
    }

    async fn after_many(&self, _ctx: &mut ServiceContext, _items: &mut Vec<M>) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct NoopHooks;

impl<M: Model> Hooks<M> for NoopHooks {}

/// Hooks per operation, owned by one lifecycle. Operations without a
/// registration get [`NoopHooks`].
pub struct HookRegistry<M> {
    by_op: HashMap<Operation, Arc<dyn Hooks<M>>>,
    fallback: Arc<dyn Hooks<M>>,
}

impl<M: Model> Default for HookRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> Clone for HookRegistry<M> {
    fn clone(&self) -> Self {
        HookRegistry {
            by_op: self.by_op.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<M: Model> HookRegistry<M> {
    pub fn new() -> Self {
        HookRegistry {
            by_op: HashMap::new(),
            fallback: Arc::new(NoopHooks),
        }
    }

    /// Same hooks for every operation without an explicit registration.
    pub fn with_default(hooks: Arc<dyn Hooks<M>>) -> Self {
        HookRegistry {
            by_op: HashMap::new(),
            fallback: hooks,
        }
    }

    pub fn register(mut self, op: Operation, hooks: Arc<dyn Hooks<M>>) -> Self {
        self.by_op.insert(op, hooks);
        self
    }

    pub fn get(&self, op: Operation) -> Arc<dyn Hooks<M>> {
        self.by_op.get(&op).cloned().unwrap_or_else(|| self.fallback.clone())
    }
}

/// Full handler for one operation when the wire types differ from the
/// resource. Owns the whole before/persist/after sequence; nothing is stored
/// and no audit field is populated on its behalf.
#[async_trait]
pub trait CustomService<Req, Rsp>: Send + Sync
where
    Req: Send + 'static,
    Rsp: Send + 'static,
{
    async fn handle(&self, ctx: &mut ServiceContext, req: Req) -> Result<Rsp, AppError>;
}

/// Type-erased custom service taking and returning JSON.
#[async_trait]
pub trait CustomEndpoint: Send + Sync {
    async fn call(&self, ctx: &mut ServiceContext, input: Value) -> Result<Value, AppError>;
}

pub(crate) struct Typed<S, Req, Rsp> {
    service: S,
    _types: PhantomData<fn(Req) -> Rsp>,
}

impl<S, Req, Rsp> Typed<S, Req, Rsp> {
    pub(crate) fn new(service: S) -> Self {
        Typed {
            service,
            _types: PhantomData,
        }
    }
}

#[async_trait]
impl<S, Req, Rsp> CustomEndpoint for Typed<S, Req, Rsp>
where
    S: CustomService<Req, Rsp>,
    Req: DeserializeOwned + Send + 'static,
    Rsp: Serialize + Send + 'static,
{
    async fn call(&self, ctx: &mut ServiceContext, input: Value) -> Result<Value, AppError> {
        let req: Req = serde_json::from_value(input)
            .map_err(|e| AppError::Validation(format!("invalid request body: {}", e)))?;
        let rsp = self.service.handle(ctx, req).await?;
        serde_json::to_value(rsp).map_err(|e| AppError::rejected(format!("unserializable response: {}", e)))
    }
}

/// Wrap a typed service for registration on a router.
pub fn custom_endpoint<S, Req, Rsp>(service: S) -> Arc<dyn CustomEndpoint>
where
    S: CustomService<Req, Rsp> + 'static,
    Req: DeserializeOwned + Send + 'static,
    Rsp: Serialize + Send + 'static,
{
    Arc::new(Typed::new(service))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::User;
    use serde::Deserialize;

    struct Tag(&'static str);

    #[async_trait]
    impl Hooks<User> for Tag {
        async fn before(&self, _ctx: &mut ServiceContext, item: &mut User) -> Result<(), AppError> {
            item.name = self.0.to_string();
            Ok(())
        }
    }

    #[tokio::test]
    async fn registry_falls_back_to_noop() {
        let registry = HookRegistry::<User>::new().register(Operation::Create, Arc::new(Tag("hooked")));
        let mut ctx = ServiceContext::internal(Operation::Create, "t");
        let mut u = User::default();
        registry.get(Operation::Create).before(&mut ctx, &mut u).await.unwrap();
        assert_eq!(u.name, "hooked");

        let mut other = User::default();
        registry.get(Operation::Update).before(&mut ctx, &mut other).await.unwrap();
        assert!(other.name.is_empty());
    }

    #[derive(Deserialize)]
    struct Login {
        user: String,
    }

    #[derive(Serialize)]
    struct Token {
        token: String,
    }

    struct LoginService;

    #[async_trait]
    impl CustomService<Login, Token> for LoginService {
        async fn handle(&self, _ctx: &mut ServiceContext, req: Login) -> Result<Token, AppError> {
            Ok(Token {
                token: format!("t-{}", req.user),
            })
        }
    }

    #[tokio::test]
    async fn erased_endpoint_binds_and_serializes() {
        let endpoint = custom_endpoint(LoginService);
        let mut ctx = ServiceContext::internal(Operation::Create, "t");
        let out = endpoint
            .call(&mut ctx, serde_json::json!({"user": "ann"}))
            .await
            .unwrap();
        assert_eq!(out["token"], "t-ann");

        let err = endpoint.call(&mut ctx, serde_json::json!([1])).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
