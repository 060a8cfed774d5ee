//! Per-call context handed to hooks and custom services.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::extractors::RequestMeta;
use crate::model::{Operation, Phase};
use crate::query::QueryDescriptor;

pub struct ServiceContext {
    operation: Operation,
    phase: Phase,
    pub meta: RequestMeta,
    route_id: Option<String>,
    query: Option<QueryDescriptor>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ServiceContext {
    pub fn new(operation: Operation, meta: RequestMeta) -> Self {
        ServiceContext {
            operation,
            phase: Phase::Before,
            meta,
            route_id: None,
            query: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Context for calls outside HTTP (jobs, tests).
    pub fn internal(operation: Operation, actor: &str) -> Self {
        Self::new(operation, RequestMeta::internal(actor))
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_route_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.route_id = (!id.is_empty()).then_some(id);
        self
    }

    pub fn with_query(mut self, query: QueryDescriptor) -> Self {
        self.query = Some(query);
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn set_operation(&mut self, operation: Operation) {
        self.operation = operation;
    }

    pub(crate) fn set_query(&mut self, query: QueryDescriptor) {
        self.query = Some(query);
    }

    pub fn actor(&self) -> &str {
        &self.meta.actor
    }

    pub fn request_id(&self) -> &str {
        &self.meta.request_id
    }

    pub fn route_id(&self) -> Option<&str> {
        self.route_id.as_deref()
    }

    /// Resolved query of a List or Get call.
    pub fn query(&self) -> Option<&QueryDescriptor> {
        self.query.as_ref()
    }

    /// Before hooks of List may narrow the query here, including
    /// `raw_predicate`, which URL parameters can never set.
    pub fn query_mut(&mut self) -> Option<&mut QueryDescriptor> {
        self.query.as_mut()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Detached handle racing steps against cancellation and the deadline,
    /// so the step itself may still borrow the context mutably.
    pub fn guard(&self) -> Guard {
        Guard {
            cancel: self.cancel.clone(),
            deadline: self.deadline,
        }
    }
}

#[derive(Clone)]
pub struct Guard {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Guard {
    pub async fn run<T, F>(&self, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(AppError::Canceled("request canceled".into()));
        }
        let raced = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(AppError::Canceled("request canceled".into())),
                result = fut => result,
            }
        };
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, raced)
                .await
                .unwrap_or_else(|_| Err(AppError::Canceled("deadline exceeded".into()))),
            None => raced.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guard_passes_results_through() {
        let ctx = ServiceContext::internal(Operation::Get, "t");
        let v = ctx.guard().run(async { Ok::<_, AppError>(3) }).await.unwrap();
        assert_eq!(v, 3);
    }

    #[tokio::test]
    async fn canceled_token_fails_fast() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ServiceContext::internal(Operation::Create, "t").with_cancel(token);
        assert!(ctx.is_canceled());
        let err = ctx.guard().run(async { Ok::<_, AppError>(()) }).await.unwrap_err();
        assert!(matches!(err, AppError::Canceled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_slow_steps() {
        let ctx = ServiceContext::internal(Operation::List, "t").with_timeout(Duration::from_millis(50));
        let err = ctx
            .guard()
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, AppError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Canceled(m) if m.contains("deadline")));
    }

    #[test]
    fn empty_route_id_is_absent() {
        let ctx = ServiceContext::internal(Operation::Update, "t").with_route_id("");
        assert!(ctx.route_id().is_none());
        let ctx = ServiceContext::internal(Operation::Update, "t").with_route_id("u1");
        assert_eq!(ctx.route_id(), Some("u1"));
    }
}
