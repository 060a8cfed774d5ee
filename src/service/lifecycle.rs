//! Orchestrator for unified-mode operations: hooks, persistence, audit.

use chrono::Utc;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use super::context::Guard;
use super::differ::merge;
use super::hooks::{CustomEndpoint, HookRegistry};
use super::ids::{collect_ids, resolve_single_id};
use super::ServiceContext;
use crate::audit::{AuditRecord, AuditRecorder};
use crate::error::AppError;
use crate::model::{stub, BatchEnvelope, BatchOptions, BatchSummary, Model, Operation, Phase, Schema};
use crate::query::{resolve_query, QueryDefaults, QueryDescriptor};
use crate::response::ListPage;
use crate::store::Store;
use crate::telemetry::{observe, Step};

/// How an operation is served, fixed when it is registered on a router.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// Wire types are the resource itself; the engine runs the whole pipeline.
    Unified,
    /// Distinct wire types; one custom service owns the operation.
    Custom,
}

impl DispatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchMode::Unified => "unified",
            DispatchMode::Custom => "custom",
        }
    }
}

pub struct Lifecycle<M: Model> {
    schema: Arc<Schema<M>>,
    store: Arc<dyn Store<M>>,
    hooks: HookRegistry<M>,
    audit: AuditRecorder,
    defaults: QueryDefaults,
}

impl<M: Model> Lifecycle<M> {
    pub fn new(store: Arc<dyn Store<M>>, hooks: HookRegistry<M>, audit: AuditRecorder) -> Self {
        Lifecycle {
            schema: Arc::new(Schema::new()),
            store,
            hooks,
            audit,
            defaults: QueryDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: QueryDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn schema(&self) -> &Schema<M> {
        &self.schema
    }

    pub fn resource(&self) -> &'static str {
        self.schema.resource()
    }

    pub fn store(&self) -> &Arc<dyn Store<M>> {
        &self.store
    }

    pub fn resolve_query(&self, raw: &[(String, String)]) -> QueryDescriptor {
        resolve_query(raw, &self.schema, self.defaults)
    }

    async fn run<T, F>(&self, op: Operation, step: Step, guard: &Guard, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        observe(op, self.resource(), step, guard.run(fut)).await
    }

    async fn before_one(&self, ctx: &mut ServiceContext, item: &mut M) -> Result<(), AppError> {
        let op = ctx.operation();
        let hooks = self.hooks.get(op);
        let guard = ctx.guard();
        ctx.set_phase(Phase::Before);
        self.run(op, Step::Before, &guard, hooks.before(ctx, item)).await
    }

    async fn after_one(&self, ctx: &mut ServiceContext, item: &mut M) -> Result<(), AppError> {
        let op = ctx.operation();
        let hooks = self.hooks.get(op);
        let guard = ctx.guard();
        ctx.set_phase(Phase::After);
        self.run(op, Step::After, &guard, hooks.after(ctx, item)).await
    }

    async fn before_many(&self, ctx: &mut ServiceContext, items: &mut Vec<M>) -> Result<(), AppError> {
        let op = ctx.operation();
        let hooks = self.hooks.get(op);
        let guard = ctx.guard();
        ctx.set_phase(Phase::Before);
        self.run(op, Step::Before, &guard, hooks.before_many(ctx, items)).await
    }

    async fn after_many(&self, ctx: &mut ServiceContext, items: &mut Vec<M>) -> Result<(), AppError> {
        let op = ctx.operation();
        let hooks = self.hooks.get(op);
        let guard = ctx.guard();
        ctx.set_phase(Phase::After);
        self.run(op, Step::After, &guard, hooks.after_many(ctx, items)).await
    }

    /// Current stored record; zero or several matches are both "not found".
    async fn fetch_one(&self, op: Operation, guard: &Guard, id: &str) -> Result<M, AppError> {
        let query = QueryDescriptor::by_id(id).with_all_relations::<M>();
        let mut rows = self
            .run(op, Step::Fetch, guard, async {
                self.store.list(&query).await.map_err(AppError::from)
            })
            .await?;
        match rows.len() {
            1 => Ok(rows.remove(0)),
            0 => Err(AppError::NotFound(format!("{} '{}'", self.resource(), id))),
            n => Err(AppError::NotFound(format!(
                "{} '{}' is ambiguous ({} matches)",
                self.resource(),
                id,
                n
            ))),
        }
    }

    fn record(&self, ctx: &ServiceContext, id: &str) -> AuditRecord {
        AuditRecord::new(ctx.operation(), self.resource(), self.schema.table(), &ctx.meta).record_id(id)
    }

    fn audits(&self, op: Operation) -> bool {
        if op.is_read() {
            self.audit.records_reads()
        } else {
            self.audit.is_enabled()
        }
    }

    /// Failures are logged and never reach the caller.
    async fn write_audit(&self, records: Vec<AuditRecord>) {
        for record in records {
            let (op, id) = (record.operation, record.record_id.clone());
            if let Err(e) = self.audit.record(record).await {
                tracing::warn!(
                    operation = %op,
                    resource = self.resource(),
                    record_id = %id,
                    error = %e,
                    "audit record failed"
                );
            }
        }
    }

    fn stamp_new(ctx: &ServiceContext, item: &mut M) {
        let now = Utc::now();
        let id = item.id().to_string();
        item.set_id(&id);
        item.set_created_at(now);
        item.set_updated_at(now);
        item.set_created_by(ctx.actor());
        item.set_updated_by(ctx.actor());
    }

    fn stamp_replace(ctx: &ServiceContext, existing: &M, item: &mut M) {
        item.base_mut().created_at = existing.created_at();
        item.set_created_by(existing.created_by());
        item.set_updated_at(Utc::now());
        item.set_updated_by(ctx.actor());
    }

    pub async fn create(&self, ctx: &mut ServiceContext, mut item: M) -> Result<M, AppError> {
        ctx.set_operation(Operation::Create);
        Self::stamp_new(ctx, &mut item);
        self.before_one(ctx, &mut item).await?;

        let guard = ctx.guard();
        self.run(Operation::Create, Step::Persist, &guard, async {
            self.store
                .create(std::slice::from_ref(&item), false)
                .await
                .map_err(AppError::from)
        })
        .await?;

        let after = self.after_one(ctx, &mut item).await;
        if self.audits(Operation::Create) {
            let record = self.record(ctx, item.id()).after(&item);
            self.write_audit(vec![record]).await;
        }
        after?;
        Ok(item)
    }

    /// Full replacement. `created_at`/`created_by` are kept from the stored record.
    pub async fn update(&self, ctx: &mut ServiceContext, mut item: M) -> Result<M, AppError> {
        ctx.set_operation(Operation::Update);
        let id = resolve_single_id(ctx.route_id(), item.id())?;
        let guard = ctx.guard();
        let existing = self.fetch_one(Operation::Update, &guard, &id).await?;
        item.set_id(&id);
        Self::stamp_replace(ctx, &existing, &mut item);
        self.before_one(ctx, &mut item).await?;

        self.run(Operation::Update, Step::Persist, &guard, async {
            self.store
                .update(std::slice::from_ref(&item), false)
                .await
                .map_err(AppError::from)
        })
        .await?;

        let after = self.after_one(ctx, &mut item).await;
        if self.audits(Operation::Update) {
            let record = self.record(ctx, &id).before(&existing).after(&item);
            self.write_audit(vec![record]).await;
        }
        after?;
        Ok(item)
    }

    /// Merges the non-zero fields of `incoming` onto the stored record; the
    /// Before hook sees the merged result.
    pub async fn patch(&self, ctx: &mut ServiceContext, incoming: M) -> Result<M, AppError> {
        ctx.set_operation(Operation::Patch);
        let id = resolve_single_id(ctx.route_id(), incoming.id())?;
        let guard = ctx.guard();
        let existing = self.fetch_one(Operation::Patch, &guard, &id).await?;
        let mut item = existing.clone();
        merge(&mut item, &incoming, &self.schema);
        item.set_updated_at(Utc::now());
        item.set_updated_by(ctx.actor());
        self.before_one(ctx, &mut item).await?;

        self.run(Operation::Patch, Step::Persist, &guard, async {
            self.store
                .update(std::slice::from_ref(&item), false)
                .await
                .map_err(AppError::from)
        })
        .await?;

        let after = self.after_one(ctx, &mut item).await;
        if self.audits(Operation::Patch) {
            let record = self
                .record(ctx, &id)
                .before(&existing)
                .after(&item)
                .request(&incoming);
            self.write_audit(vec![record]).await;
        }
        after?;
        Ok(item)
    }

    /// Deletes the union of the route id, `query_ids` and `body_ids`.
    pub async fn delete(
        &self,
        ctx: &mut ServiceContext,
        query_ids: &[String],
        body_ids: &[String],
    ) -> Result<Vec<M>, AppError> {
        ctx.set_operation(Operation::Delete);
        let ids = collect_ids(
            ctx.route_id(),
            query_ids.iter().map(String::as_str),
            body_ids.iter().map(String::as_str),
        );
        self.remove(ctx, ids, M::default().purge()).await
    }

    /// Loads "before" snapshots, then deletes. Ids that are not stored are
    /// still passed to the store as stubs.
    async fn remove(&self, ctx: &mut ServiceContext, ids: Vec<String>, purge: bool) -> Result<Vec<M>, AppError> {
        if ids.is_empty() {
            return Err(AppError::Validation("missing identifier".into()));
        }
        let op = ctx.operation();
        let guard = ctx.guard();
        let all = QueryDescriptor::default().with_all_relations::<M>();
        let mut items = Vec::with_capacity(ids.len());
        for id in &ids {
            let found = self
                .run(op, Step::Fetch, &guard, async {
                    self.store.get(id, &all).await.map_err(AppError::from)
                })
                .await;
            match found {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {
                    tracing::debug!(resource = self.resource(), id = %id, "delete target not stored");
                    items.push(stub(id));
                }
                Err(e @ AppError::Canceled(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(resource = self.resource(), id = %id, error = %e, "before snapshot unavailable");
                    items.push(stub(id));
                }
            }
        }

        self.before_many(ctx, &mut items).await?;
        self.run(op, Step::Persist, &guard, async {
            self.store.delete(&items, purge).await.map_err(AppError::from)
        })
        .await?;

        let after = self.after_many(ctx, &mut items).await;
        if self.audits(op) {
            let records = items
                .iter()
                .map(|item| self.record(ctx, item.id()).before(item))
                .collect();
            self.write_audit(records).await;
        }
        after?;
        Ok(items)
    }

    pub async fn list(&self, ctx: &mut ServiceContext, mut query: QueryDescriptor) -> Result<ListPage<M>, AppError> {
        ctx.set_operation(Operation::List);
        for (field, values) in M::default().excludes() {
            query.excludes.entry(field).or_default().extend(values);
        }
        ctx.set_query(query);

        let mut items = Vec::new();
        self.before_many(ctx, &mut items).await?;
        let query = ctx.query().cloned().unwrap_or_default();
        let guard = ctx.guard();

        let mut items = self
            .run(Operation::List, Step::Persist, &guard, async {
                self.store.list(&query).await.map_err(AppError::from)
            })
            .await?;
        if query.pagination.cursor().is_some_and(|c| !c.next) {
            items.reverse();
        }

        self.after_many(ctx, &mut items).await?;

        let total = if query.skip_total() {
            None
        } else {
            let n = self
                .run(Operation::List, Step::Count, &guard, async {
                    self.store.count(&query).await.map_err(AppError::from)
                })
                .await?;
            Some(n)
        };

        if self.audits(Operation::List) {
            let record = self
                .record(ctx, "")
                .request(&query)
                .response(&serde_json::json!({ "count": items.len(), "total": total }));
            self.write_audit(vec![record]).await;
        }
        Ok(ListPage { items, total })
    }

    /// Identity comes from the route, else from an `id` filter.
    pub async fn get(&self, ctx: &mut ServiceContext, query: QueryDescriptor) -> Result<M, AppError> {
        ctx.set_operation(Operation::Get);
        let fallback = query
            .filters
            .get("id")
            .and_then(|v| v.first())
            .cloned()
            .unwrap_or_default();
        let id = resolve_single_id(ctx.route_id(), &fallback)?;
        ctx.set_query(query);

        let mut probe: M = stub(&id);
        self.before_one(ctx, &mut probe).await?;
        let query = ctx.query().cloned().unwrap_or_default();
        let guard = ctx.guard();

        let found = self
            .run(Operation::Get, Step::Persist, &guard, async {
                self.store.get(&id, &query).await.map_err(AppError::from)
            })
            .await?;
        let mut item = found.ok_or_else(|| AppError::NotFound(format!("{} '{}'", self.resource(), id)))?;

        self.after_one(ctx, &mut item).await?;
        if self.audits(Operation::Get) {
            let record = self.record(ctx, &id).request(&query).after(&item);
            self.write_audit(vec![record]).await;
        }
        Ok(item)
    }

    pub async fn create_many(
        &self,
        ctx: &mut ServiceContext,
        batch: BatchEnvelope<M>,
    ) -> Result<BatchEnvelope<M>, AppError> {
        ctx.set_operation(Operation::CreateMany);
        batch.check_exclusive()?;
        let options = batch.options;
        let mut items = batch.items;
        if items.is_empty() {
            return Err(AppError::Validation("no items".into()));
        }
        for item in items.iter_mut() {
            Self::stamp_new(ctx, item);
        }
        self.before_many(ctx, &mut items).await?;

        let guard = ctx.guard();
        self.run(Operation::CreateMany, Step::Persist, &guard, async {
            self.store.create(&items, options.atomic).await.map_err(AppError::from)
        })
        .await?;

        let after = self.after_many(ctx, &mut items).await;
        if self.audits(Operation::CreateMany) {
            let records = items
                .iter()
                .map(|item| self.record(ctx, item.id()).after(item))
                .collect();
            self.write_audit(records).await;
        }
        after?;
        Ok(summarize(items, options, 0))
    }

    /// Every item must carry an id and match exactly one stored record.
    pub async fn update_many(
        &self,
        ctx: &mut ServiceContext,
        batch: BatchEnvelope<M>,
    ) -> Result<BatchEnvelope<M>, AppError> {
        ctx.set_operation(Operation::UpdateMany);
        batch.check_exclusive()?;
        let options = batch.options;
        let mut items = batch.items;
        if items.is_empty() {
            return Err(AppError::Validation("no items".into()));
        }
        let guard = ctx.guard();
        let mut previous = Vec::with_capacity(items.len());
        for item in items.iter_mut() {
            let id = resolve_single_id(None, item.id())?;
            let existing = self.fetch_one(Operation::UpdateMany, &guard, &id).await?;
            Self::stamp_replace(ctx, &existing, item);
            previous.push(existing);
        }
        self.before_many(ctx, &mut items).await?;

        self.run(Operation::UpdateMany, Step::Persist, &guard, async {
            self.store.update(&items, options.atomic).await.map_err(AppError::from)
        })
        .await?;

        let after = self.after_many(ctx, &mut items).await;
        if self.audits(Operation::UpdateMany) {
            let records = previous
                .iter()
                .zip(items.iter())
                .map(|(old, new)| self.record(ctx, new.id()).before(old).after(new))
                .collect();
            self.write_audit(records).await;
        }
        after?;
        Ok(summarize(items, options, 0))
    }

    /// Items whose stored record cannot be loaded are logged and skipped;
    /// a persistence failure aborts the whole batch.
    pub async fn patch_many(
        &self,
        ctx: &mut ServiceContext,
        batch: BatchEnvelope<M>,
    ) -> Result<BatchEnvelope<M>, AppError> {
        ctx.set_operation(Operation::PatchMany);
        batch.check_exclusive()?;
        let options = batch.options;
        if batch.items.is_empty() {
            return Err(AppError::Validation("no items".into()));
        }
        let guard = ctx.guard();
        let mut previous = Vec::new();
        let mut items = Vec::new();
        let mut skipped = 0;
        for incoming in &batch.items {
            let existing = match self.fetch_one(Operation::PatchMany, &guard, incoming.id()).await {
                Ok(existing) => existing,
                Err(e @ AppError::Canceled(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(resource = self.resource(), id = %incoming.id(), error = %e, "patch item skipped");
                    skipped += 1;
                    continue;
                }
            };
            let mut item = existing.clone();
            merge(&mut item, incoming, &self.schema);
            item.set_updated_at(Utc::now());
            item.set_updated_by(ctx.actor());
            previous.push(existing);
            items.push(item);
        }
        if items.is_empty() {
            return Ok(summarize(items, options, skipped));
        }
        self.before_many(ctx, &mut items).await?;

        self.run(Operation::PatchMany, Step::Persist, &guard, async {
            self.store.update(&items, options.atomic).await.map_err(AppError::from)
        })
        .await?;

        let after = self.after_many(ctx, &mut items).await;
        if self.audits(Operation::PatchMany) {
            let records = previous
                .iter()
                .zip(items.iter())
                .map(|(old, new)| self.record(ctx, new.id()).before(old).after(new))
                .collect();
            self.write_audit(records).await;
        }
        after?;
        Ok(summarize(items, options, skipped))
    }

    /// Deletes `ids` plus the ids of `items`; `options.purge` forces a hard delete.
    pub async fn delete_many(
        &self,
        ctx: &mut ServiceContext,
        batch: BatchEnvelope<M>,
    ) -> Result<BatchEnvelope<M>, AppError> {
        ctx.set_operation(Operation::DeleteMany);
        batch.check_exclusive()?;
        let ids = collect_ids(
            None,
            batch.ids.iter().map(String::as_str),
            batch.items.iter().map(|m| m.id()),
        );
        let purge = batch.options.purge || M::default().purge();
        let removed = self.remove(ctx, ids, purge).await?;
        let total = removed.len();
        Ok(BatchEnvelope {
            items: Vec::new(),
            ids: removed.iter().map(|m| m.id().to_string()).collect(),
            options: batch.options,
            summary: Some(BatchSummary {
                total,
                succeeded: total,
                failed: 0,
            }),
        })
    }

    /// Runs a custom-mode service for `ctx.operation()`. Request and response
    /// payloads are audited on success; nothing else is done on its behalf.
    pub async fn call_custom(
        &self,
        ctx: &mut ServiceContext,
        endpoint: &dyn CustomEndpoint,
        input: Value,
    ) -> Result<Value, AppError> {
        let op = ctx.operation();
        let guard = ctx.guard();
        let request = self.audits(op).then(|| input.clone());
        let output = self.run(op, Step::Custom, &guard, endpoint.call(ctx, input)).await?;
        if let Some(request) = request {
            let id = ctx.route_id().unwrap_or_default().to_string();
            let record = self.record(ctx, &id).request(&request).response(&output);
            self.write_audit(vec![record]).await;
        }
        Ok(output)
    }
}

fn summarize<M>(items: Vec<M>, options: BatchOptions, failed: usize) -> BatchEnvelope<M> {
    let succeeded = items.len();
    BatchEnvelope {
        items,
        ids: Vec::new(),
        options,
        summary: Some(BatchSummary {
            total: succeeded + failed,
            succeeded,
            failed,
        }),
    }
}
