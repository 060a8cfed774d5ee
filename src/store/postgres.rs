//! PostgreSQL document store: one JSONB row per resource in `<schema>.<table>`.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::marker::PhantomData;

use super::{ensure_resource_table, qualified_table, relation_names, shape_relations, Store};
use crate::error::StoreError;
use crate::model::Model;
use crate::query::QueryDescriptor;
use crate::sql::{self, bind_params, QueryBuf};

pub struct PgStore<M> {
    pool: PgPool,
    table: String,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> PgStore<M> {
    /// Creates the backing table if missing.
    pub async fn new(pool: PgPool, schema: &str) -> Result<Self, StoreError> {
        let table = M::table_name();
        sql::check_identifier(schema)?;
        ensure_resource_table(&pool, schema, &table).await?;
        tracing::info!(schema = %schema, table = %table, "resource table ready");
        Ok(PgStore {
            pool,
            table: qualified_table(schema, &table),
            _model: PhantomData,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn execute_all(&self, statements: Vec<QueryBuf>, atomic: bool) -> Result<u64, StoreError> {
        let mut affected = 0;
        if atomic {
            let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;
            for q in &statements {
                affected += bind_params(sqlx::query(&q.sql), &q.params)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }
            tx.commit().await?;
        } else {
            for q in &statements {
                affected += bind_params(sqlx::query(&q.sql), &q.params)
                    .execute(&self.pool)
                    .await?
                    .rows_affected();
            }
        }
        Ok(affected)
    }
}

/// Payload of one row, shaped by the descriptor's `_expand`.
fn decode<M: Model>(row: &PgRow, query: &QueryDescriptor, relations: &[&'static str]) -> Result<M, StoreError> {
    let sqlx::types::Json(mut payload) = row.try_get::<sqlx::types::Json<Value>, _>("payload")?;
    if let Value::Object(doc) = &mut payload {
        shape_relations(doc, relations, &query.expand);
    }
    Ok(serde_json::from_value(payload)?)
}

fn log_ignored_hints(query: &QueryDescriptor) {
    if let Some(hint) = &query.index_hint {
        tracing::debug!(index = %hint.name, mode = %hint.mode, "index hint not applied by document store");
    }
    if query.cache_enabled {
        tracing::debug!("query cache requested; document store does not cache");
    }
}

#[async_trait]
impl<M: Model> Store<M> for PgStore<M> {
    async fn create(&self, items: &[M], atomic: bool) -> Result<(), StoreError> {
        let mut statements = Vec::with_capacity(items.len());
        for item in items {
            statements.push(sql::insert(
                &self.table,
                item.id(),
                serde_json::to_value(item)?,
                item.created_at(),
                item.updated_at(),
            ));
        }
        self.execute_all(statements, atomic).await.map_err(|e| match e {
            StoreError::Db(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            other => other,
        })?;
        Ok(())
    }

    async fn update(&self, items: &[M], atomic: bool) -> Result<(), StoreError> {
        let mut statements = Vec::with_capacity(items.len());
        for item in items {
            statements.push(sql::update(
                &self.table,
                item.id(),
                serde_json::to_value(item)?,
                item.updated_at(),
            ));
        }
        let affected = self.execute_all(statements, atomic).await?;
        tracing::debug!(table = %self.table, affected, "rows updated");
        Ok(())
    }

    async fn delete(&self, items: &[M], purge: bool) -> Result<(), StoreError> {
        let ids: Vec<String> = items.iter().map(|m| m.id().to_string()).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let q = if purge {
            sql::purge(&self.table, &ids)
        } else {
            sql::soft_delete(&self.table, &ids)
        };
        let affected = self.execute_all(vec![q], true).await?;
        tracing::debug!(table = %self.table, affected, purge, "rows deleted");
        Ok(())
    }

    async fn list(&self, query: &QueryDescriptor) -> Result<Vec<M>, StoreError> {
        log_ignored_hints(query);
        let q = sql::select(&self.table, query)?;
        let rows = bind_params(sqlx::query(&q.sql), &q.params)
            .fetch_all(&self.pool)
            .await?;
        let relations = relation_names::<M>();
        if !query.expand.is_empty() {
            tracing::debug!(rows = rows.len(), expand = ?query.expand_paths(), "expanding embedded relations");
        }
        rows.iter().map(|row| decode::<M>(row, query, &relations)).collect()
    }

    async fn get(&self, id: &str, query: &QueryDescriptor) -> Result<Option<M>, StoreError> {
        let q = sql::select_by_id(&self.table, id, &query.select)?;
        let row = bind_params(sqlx::query(&q.sql), &q.params)
            .fetch_optional(&self.pool)
            .await?;
        let relations = relation_names::<M>();
        row.as_ref().map(|row| decode::<M>(row, query, &relations)).transpose()
    }

    async fn count(&self, query: &QueryDescriptor) -> Result<u64, StoreError> {
        let q = sql::count(&self.table, query)?;
        let row = bind_params(sqlx::query(&q.sql), &q.params)
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }
}
