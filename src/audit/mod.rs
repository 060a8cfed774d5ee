//! Audit recording: one immutable record per orchestrated call, delivered
//! synchronously or through a bounded buffer drained in the background.

mod buffer;
mod sink;

pub use buffer::RingBuffer;
pub use sink::{MemoryAuditSink, PgAuditSink};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AuditConfig, AuditMode};
use crate::error::AuditError;
use crate::extractors::RequestMeta;
use crate::model::Operation;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub operation: Operation,
    /// Resource type name.
    pub resource: String,
    /// Physical storage name.
    pub table: String,
    pub record_id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub request: Option<Value>,
    pub response: Option<Value>,
    pub actor: String,
    pub client_ip: String,
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(operation: Operation, resource: &str, table: &str, meta: &RequestMeta) -> Self {
        AuditRecord {
            id: uuid::Uuid::new_v4().to_string(),
            operation,
            resource: resource.to_string(),
            table: table.to_string(),
            record_id: String::new(),
            before: None,
            after: None,
            request: None,
            response: None,
            actor: meta.actor.clone(),
            client_ip: meta.client_ip.clone(),
            request_id: meta.request_id.clone(),
            method: meta.method.to_string(),
            path: meta.path.clone(),
            user_agent: meta.user_agent.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn record_id(mut self, id: &str) -> Self {
        self.record_id = id.to_string();
        self
    }

    pub fn before<T: Serialize>(mut self, value: &T) -> Self {
        self.before = snapshot(value);
        self
    }

    pub fn after<T: Serialize>(mut self, value: &T) -> Self {
        self.after = snapshot(value);
        self
    }

    pub fn request<T: Serialize>(mut self, value: &T) -> Self {
        self.request = snapshot(value);
        self
    }

    pub fn response<T: Serialize>(mut self, value: &T) -> Self {
        self.response = snapshot(value);
        self
    }
}

fn snapshot<T: Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(error = %e, "audit snapshot not serializable");
            None
        }
    }
}

/// Destination of audit records (database table, log pipeline, test buffer).
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, records: &[AuditRecord]) -> Result<(), AuditError>;
}

enum Delivery {
    Off,
    Sync,
    Async {
        buffer: Arc<RingBuffer<AuditRecord>>,
        batch_size: usize,
    },
}

struct RecorderInner {
    sink: Option<Arc<dyn AuditSink>>,
    delivery: Delivery,
    include_reads: bool,
}

/// Cheap to clone; every lifecycle shares one recorder.
#[derive(Clone)]
pub struct AuditRecorder {
    inner: Arc<RecorderInner>,
}

impl AuditRecorder {
    pub fn disabled() -> Self {
        AuditRecorder {
            inner: Arc::new(RecorderInner {
                sink: None,
                delivery: Delivery::Off,
                include_reads: false,
            }),
        }
    }

    /// Direct writes on the request path.
    pub fn sync(sink: Arc<dyn AuditSink>, include_reads: bool) -> Self {
        AuditRecorder {
            inner: Arc::new(RecorderInner {
                sink: Some(sink),
                delivery: Delivery::Sync,
                include_reads,
            }),
        }
    }

    /// Buffered writes drained every `drain_interval_ms` by a spawned task that
    /// stops (after a final drain) when `shutdown` is cancelled.
    pub fn spawn_async(
        sink: Arc<dyn AuditSink>,
        config: &AuditConfig,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let buffer = Arc::new(RingBuffer::new(config.capacity));
        let batch_size = config.batch_size.max(1);
        let handle = tokio::spawn(drain_loop(
            buffer.clone(),
            sink.clone(),
            Duration::from_millis(config.drain_interval_ms.max(1)),
            batch_size,
            shutdown,
        ));
        let recorder = AuditRecorder {
            inner: Arc::new(RecorderInner {
                sink: Some(sink),
                delivery: Delivery::Async { buffer, batch_size },
                include_reads: config.include_reads,
            }),
        };
        (recorder, handle)
    }

    pub fn from_config(
        config: &AuditConfig,
        sink: Arc<dyn AuditSink>,
        shutdown: CancellationToken,
    ) -> (Self, Option<JoinHandle<()>>) {
        match config.mode {
            AuditMode::Off => (Self::disabled(), None),
            AuditMode::Sync => (Self::sync(sink, config.include_reads), None),
            AuditMode::Async => {
                let (recorder, handle) = Self::spawn_async(sink, config, shutdown);
                (recorder, Some(handle))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.inner.delivery, Delivery::Off)
    }

    /// Whether List/Get produce records.
    pub fn records_reads(&self) -> bool {
        self.is_enabled() && self.inner.include_reads
    }

    /// Deliver one record. In async mode this only enqueues and never waits on
    /// the sink; a full buffer evicts its oldest record.
    pub async fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        match (&self.inner.delivery, &self.inner.sink) {
            (Delivery::Off, _) | (_, None) => Ok(()),
            (Delivery::Sync, Some(sink)) => sink.write(std::slice::from_ref(&record)).await,
            (Delivery::Async { buffer, .. }, Some(_)) => {
                if buffer.push(record) {
                    tracing::warn!(dropped = buffer.dropped(), "audit buffer full, oldest record dropped");
                }
                Ok(())
            }
        }
    }

    /// Drain everything buffered right now. Returns the number of records written.
    pub async fn flush(&self) -> Result<usize, AuditError> {
        match (&self.inner.delivery, &self.inner.sink) {
            (Delivery::Async { buffer, batch_size }, Some(sink)) => {
                let mut written = 0;
                loop {
                    let batch = buffer.drain(*batch_size);
                    if batch.is_empty() {
                        return Ok(written);
                    }
                    sink.write(&batch).await?;
                    written += batch.len();
                }
            }
            _ => Ok(0),
        }
    }

    pub fn pending(&self) -> usize {
        match &self.inner.delivery {
            Delivery::Async { buffer, .. } => buffer.len(),
            _ => 0,
        }
    }

    pub fn dropped(&self) -> u64 {
        match &self.inner.delivery {
            Delivery::Async { buffer, .. } => buffer.dropped(),
            _ => 0,
        }
    }
}

async fn drain_loop(
    buffer: Arc<RingBuffer<AuditRecord>>,
    sink: Arc<dyn AuditSink>,
    interval: Duration,
    batch_size: usize,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::debug!(capacity = buffer.capacity(), ?interval, "audit drain started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                while !buffer.is_empty() {
                    write_batch(&buffer, sink.as_ref(), batch_size).await;
                }
                tracing::debug!("audit drain stopped");
                return;
            }
            _ = ticker.tick() => {
                write_batch(&buffer, sink.as_ref(), batch_size).await;
            }
        }
    }
}

async fn write_batch(buffer: &RingBuffer<AuditRecord>, sink: &dyn AuditSink, batch_size: usize) {
    let batch = buffer.drain(batch_size);
    if batch.is_empty() {
        return;
    }
    if let Err(e) = sink.write(&batch).await {
        tracing::warn!(error = %e, lost = batch.len(), "audit batch write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(op: Operation, id: &str) -> AuditRecord {
        AuditRecord::new(op, "User", "user", &RequestMeta::internal("tester")).record_id(id)
    }

    #[tokio::test]
    async fn sync_mode_surfaces_sink_errors() {
        let sink = Arc::new(MemoryAuditSink::new());
        let recorder = AuditRecorder::sync(sink.clone(), true);
        recorder.record(record(Operation::Create, "a")).await.unwrap();
        assert_eq!(sink.records().len(), 1);
        sink.set_failing(true);
        assert!(recorder.record(record(Operation::Create, "b")).await.is_err());
    }

    #[tokio::test]
    async fn async_mode_enqueues_without_touching_the_sink() {
        let sink = Arc::new(MemoryAuditSink::new());
        sink.set_failing(true);
        let config = AuditConfig {
            capacity: 2,
            drain_interval_ms: 60_000,
            ..AuditConfig::default()
        };
        let shutdown = CancellationToken::new();
        let (recorder, _handle) = AuditRecorder::spawn_async(sink.clone(), &config, shutdown.clone());
        for id in ["a", "b", "c"] {
            recorder.record(record(Operation::Update, id)).await.unwrap();
        }
        assert_eq!(recorder.pending(), 2);
        assert_eq!(recorder.dropped(), 1);

        sink.set_failing(false);
        assert_eq!(recorder.flush().await.unwrap(), 2);
        let ids: Vec<_> = sink.records().into_iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn shutdown_drains_remaining_records() {
        let sink = Arc::new(MemoryAuditSink::new());
        let config = AuditConfig {
            drain_interval_ms: 60_000,
            ..AuditConfig::default()
        };
        let shutdown = CancellationToken::new();
        let (recorder, handle) = AuditRecorder::spawn_async(sink.clone(), &config, shutdown.clone());
        recorder.record(record(Operation::Delete, "x")).await.unwrap();
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn disabled_recorder_ignores_records() {
        let recorder = AuditRecorder::disabled();
        assert!(!recorder.records_reads());
        recorder.record(record(Operation::Get, "x")).await.unwrap();
        assert_eq!(recorder.flush().await.unwrap(), 0);
    }

    #[test]
    fn record_captures_request_meta() {
        let mut meta = RequestMeta::internal("alice");
        meta.client_ip = "10.0.0.9".into();
        let rec = AuditRecord::new(Operation::Patch, "User", "user", &meta)
            .record_id("u1")
            .before(&serde_json::json!({"name": "old"}))
            .after(&serde_json::json!({"name": "new"}));
        assert_eq!(rec.actor, "alice");
        assert_eq!(rec.client_ip, "10.0.0.9");
        assert_eq!(rec.method, "GET");
        assert_eq!(rec.before.unwrap()["name"], "old");
        assert_eq!(rec.after.unwrap()["name"], "new");
    }
}
