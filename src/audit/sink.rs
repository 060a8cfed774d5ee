//! Audit sinks: PostgreSQL `_sys_audit_log` table and an in-memory buffer.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{AuditRecord, AuditSink};
use crate::error::AuditError;
use crate::store::{ensure_audit_table, qualified_table, AUDIT_TABLE};

/// Writes batches into `<schema>._sys_audit_log` in one transaction.
pub struct PgAuditSink {
    pool: PgPool,
    table: String,
}

impl PgAuditSink {
    /// Creates the audit table if missing.
    pub async fn new(pool: PgPool, schema: &str) -> Result<Self, AuditError> {
        ensure_audit_table(&pool, schema)
            .await
            .map_err(|e| AuditError::Sink(e.to_string()))?;
        Ok(PgAuditSink {
            pool,
            table: qualified_table(schema, AUDIT_TABLE),
        })
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn write(&self, records: &[AuditRecord]) -> Result<(), AuditError> {
        if records.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "INSERT INTO {} (id, operation, resource, table_name, record_id, before, after, request, response, \
             actor, client_ip, request_id, method, path, user_agent, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
            self.table
        );
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(&sql)
                .bind(&r.id)
                .bind(r.operation.as_str())
                .bind(&r.resource)
                .bind(&r.table)
                .bind(&r.record_id)
                .bind(r.before.as_ref().map(sqlx::types::Json))
                .bind(r.after.as_ref().map(sqlx::types::Json))
                .bind(r.request.as_ref().map(sqlx::types::Json))
                .bind(r.response.as_ref().map(sqlx::types::Json))
                .bind(&r.actor)
                .bind(&r.client_ip)
                .bind(&r.request_id)
                .bind(&r.method)
                .bind(&r.path)
                .bind(&r.user_agent)
                .bind(r.created_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::debug!(count = records.len(), "audit records written");
        Ok(())
    }
}

/// Keeps records in memory; can be switched into a failing state.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    failing: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, records: &[AuditRecord]) -> Result<(), AuditError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Sink("memory sink set to fail".into()));
        }
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(records);
        Ok(())
    }
}
