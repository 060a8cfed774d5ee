//! Storage capability consumed by the orchestrator, plus DDL for the bundled
//! PostgreSQL backend. All tables live in the configured schema (default `lifecycle`).

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::error::StoreError;
use crate::model::Model;
use crate::query::{Expansion, QueryDescriptor};

/// Narrow persistence interface. The orchestrator never inspects what sits behind it.
#[async_trait]
pub trait Store<M: Model>: Send + Sync {
    /// Insert all items; with `atomic` either all or none are stored.
    async fn create(&self, items: &[M], atomic: bool) -> Result<(), StoreError>;
    /// Replace all items by identity.
    async fn update(&self, items: &[M], atomic: bool) -> Result<(), StoreError>;
    /// Remove by identity; soft delete unless `purge`.
    async fn delete(&self, items: &[M], purge: bool) -> Result<(), StoreError>;
    async fn list(&self, query: &QueryDescriptor) -> Result<Vec<M>, StoreError>;
    async fn get(&self, id: &str, query: &QueryDescriptor) -> Result<Option<M>, StoreError>;
    /// Rows matching the descriptor's predicates, ignoring pagination.
    async fn count(&self, query: &QueryDescriptor) -> Result<u64, StoreError>;
}

/// Declared relation fields of `M`, expandable or not.
pub(crate) fn relation_names<M: Model>() -> Vec<&'static str> {
    M::fields()
        .iter()
        .filter(|f| f.kind().is_relation())
        .map(|f| f.name())
        .collect()
}

/// Applies `_expand` to one stored document: relations not expanded are
/// removed, and a relation expanded to `depth` keeps that many levels of itself.
pub fn shape_relations(doc: &mut Map<String, Value>, relations: &[&str], expand: &[Expansion]) {
    for name in relations {
        match expand.iter().find(|e| e.relation == *name) {
            Some(e) => {
                if let Some(value) = doc.get_mut(*name) {
                    cut_at(value, name, e.depth.max(1) - 1);
                }
            }
            None => {
                doc.remove(*name);
            }
        }
    }
}

fn cut_at(value: &mut Value, relation: &str, remaining: u8) {
    match value {
        Value::Array(items) => {
            for item in items {
                cut_at(item, relation, remaining);
            }
        }
        Value::Object(map) if remaining == 0 => {
            map.remove(relation);
        }
        Value::Object(map) => {
            if let Some(next) = map.get_mut(relation) {
                cut_at(next, relation, remaining - 1);
            }
        }
        _ => {}
    }
}

/// Audit log table name inside the configured schema.
pub const AUDIT_TABLE: &str = "_sys_audit_log";

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Schema-qualified, quoted table name (e.g. `"lifecycle"."user"`).
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

pub async fn ensure_schema(pool: &PgPool, schema: &str) -> Result<(), sqlx::Error> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)))
        .execute(pool)
        .await?;
    Ok(())
}

/// Document table backing one resource type: identity columns plus a JSONB payload.
pub async fn ensure_resource_table(pool: &PgPool, schema: &str, table: &str) -> Result<(), sqlx::Error> {
    ensure_schema(pool, schema).await?;
    let q_table = qualified_table(schema, table);
    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            payload JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            deleted_at TIMESTAMPTZ
        )
        "#,
        q_table
    );
    sqlx::query(&ddl).execute(pool).await?;
    Ok(())
}

pub async fn ensure_audit_table(pool: &PgPool, schema: &str) -> Result<(), sqlx::Error> {
    ensure_schema(pool, schema).await?;
    let q_table = qualified_table(schema, AUDIT_TABLE);
    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            operation TEXT NOT NULL,
            resource TEXT NOT NULL,
            table_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            before JSONB,
            after JSONB,
            request JSONB,
            response JSONB,
            actor TEXT NOT NULL,
            client_ip TEXT NOT NULL,
            request_id TEXT NOT NULL,
            method TEXT NOT NULL,
            path TEXT NOT NULL,
            user_agent TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        q_table
    );
    sqlx::query(&ddl).execute(pool).await?;
    let index = format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} (table_name, record_id)",
        quoted(&format!("{}_record_idx", AUDIT_TABLE)),
        q_table
    );
    let _ = sqlx::query(&index).execute(pool).await;
    Ok(())
}
