/// Audit trail
///
/// Security-relevant events such as rejected credentials and permission
/// changes are appended to `public.audit_logs`. Recording never blocks or
/// fails the request that produced the event:
///
/// - [`AuditRecorder::record`] enqueues on a bounded channel and returns
/// - a background task drains the channel into an [`AuditSink`]
/// - a full queue drops the event with a warning, a sink failure is logged
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tenantgate_shared::audit::{AuditEvent, AuditRecorder, PgAuditSink};
/// # async fn example(pool: sqlx::PgPool, ctx: tenantgate_shared::context::RequestContext) {
/// let (recorder, _drain) = AuditRecorder::spawn(Arc::new(PgAuditSink::new(pool)));
///
/// recorder.record(&ctx, AuditEvent::new("permissions.replace", "principal").success(true));
/// # }
/// ```

use crate::context::{ClientInfo, RequestContext};
use crate::error::CoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Default queue capacity
pub const AUDIT_QUEUE_CAPACITY: usize = 1024;

/// What happened, as described by the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub action: String,
    pub resource: String,
    pub resource_id: Option<String>,
    pub success: bool,
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
            resource_id: None,
            success: true,
            details: None,
        }
    }

    pub fn resource_id(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// One row of the audit trail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub tenant_id: Option<Uuid>,
    pub principal_id: Option<Uuid>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub event: AuditEvent,
    pub client: ClientInfo,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Record attributed to the context's principal and tenant
    pub fn from_context(ctx: &RequestContext, event: AuditEvent) -> Self {
        Self {
            tenant_id: Some(ctx.tenant_id()),
            principal_id: Some(ctx.principal_id()),
            email: None,
            role: Some(ctx.principal().role().to_string()),
            event,
            client: ctx.client().clone(),
            created_at: Utc::now(),
        }
    }

    /// Rejected credential, recorded before any principal is established
    pub fn authentication_failure(client: ClientInfo, reason: &str) -> Self {
        Self {
            tenant_id: None,
            principal_id: None,
            email: None,
            role: None,
            event: AuditEvent::new("auth.failed", "session")
                .success(false)
                .details(serde_json::json!({ "reason": reason })),
            client,
            created_at: Utc::now(),
        }
    }
}

/// Append-only destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> CoreResult<()>;
}

/// [`AuditSink`] writing to `public.audit_logs`
#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Number of records written before `cutoff`
    ///
    /// Records are never deleted by the application; retention sweeps only
    /// report what a manual archive would cover.
    pub async fn count_before(&self, cutoff: DateTime<Utc>) -> CoreResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM public.audit_logs WHERE created_at < $1")
                .bind(cutoff)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append(&self, record: &AuditRecord) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO public.audit_logs
                (tenant_id, principal_id, email, role, action, resource, resource_id,
                 method, path, ip, user_agent, details, success, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(record.tenant_id)
        .bind(record.principal_id)
        .bind(&record.email)
        .bind(&record.role)
        .bind(&record.event.action)
        .bind(&record.event.resource)
        .bind(&record.event.resource_id)
        .bind(&record.client.method)
        .bind(&record.client.path)
        .bind(&record.client.ip)
        .bind(&record.client.user_agent)
        .bind(&record.event.details)
        .bind(record.event.success)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Non-blocking front end to an [`AuditSink`]
///
/// Clones share the queue. The drain task ends once every clone is dropped
/// and the queue is empty.
#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::Sender<AuditRecord>,
    dropped: Arc<AtomicU64>,
}

impl AuditRecorder {
    /// Starts the drain task with the default capacity
    pub fn spawn(sink: Arc<dyn AuditSink>) -> (Self, JoinHandle<()>) {
        Self::with_capacity(sink, AUDIT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(sink: Arc<dyn AuditSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AuditRecord>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = sink.append(&record).await {
                    tracing::error!(
                        action = %record.event.action,
                        resource = %record.event.resource,
                        principal_id = ?record.principal_id,
                        error = %e,
                        "Failed to write audit record"
                    );
                }
            }
            tracing::debug!("Audit drain task stopped");
        });

        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    /// Enqueues an event attributed to the request's principal
    pub fn record(&self, ctx: &RequestContext, event: AuditEvent) {
        self.enqueue(AuditRecord::from_context(ctx, event));
    }

    /// Enqueues a rejected authentication attempt
    pub fn record_auth_failure(&self, client: ClientInfo, reason: &str) {
        self.enqueue(AuditRecord::authentication_failure(client, reason));
    }

    /// Events dropped because the queue was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn enqueue(&self, record: AuditRecord) {
        if let Err(e) = self.tx.try_send(record) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let record = match e {
                mpsc::error::TrySendError::Full(r) | mpsc::error::TrySendError::Closed(r) => r,
            };
            tracing::warn!(
                action = %record.event.action,
                resource = %record.event.resource,
                "Audit queue unavailable, dropping event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PrincipalRef;
    use crate::tenancy::PartitionResolver;
    use crate::testutil::MemoryAuditSink;

    fn ctx() -> RequestContext {
        let tenant_id = Uuid::new_v4();
        RequestContext::new(
            PrincipalRef::user(Uuid::new_v4(), "admin", false),
            tenant_id,
            PartitionResolver::default().resolve(tenant_id),
            ClientInfo {
                ip: Some("198.51.100.4".to_string()),
                method: Some("PUT".to_string()),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_records_reach_sink_with_context() {
        let sink = MemoryAuditSink::new();
        let (recorder, drain) = AuditRecorder::spawn(Arc::new(sink.clone()));
        let ctx = ctx();

        recorder.record(&ctx, AuditEvent::new("permissions.replace", "principal").resource_id("p-1"));
        recorder.record_auth_failure(
            ClientInfo {
                ip: Some("203.0.113.9".to_string()),
                ..Default::default()
            },
            "Invalid API key",
        );
        drop(recorder);
        drain.await.unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tenant_id, Some(ctx.tenant_id()));
        assert_eq!(records[0].principal_id, Some(ctx.principal_id()));
        assert_eq!(records[0].role.as_deref(), Some("admin"));
        assert_eq!(records[0].client.ip.as_deref(), Some("198.51.100.4"));
        assert_eq!(records[0].event.resource_id.as_deref(), Some("p-1"));
        assert_eq!(records[1].event.action, "auth.failed");
        assert_eq!(records[1].principal_id, None);
        assert_eq!(records[1].client.ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(records[1].event.details, Some(serde_json::json!({ "reason": "Invalid API key" })));
        assert!(!records[1].event.success);
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let sink = MemoryAuditSink::new();
        sink.set_failing(true);
        let (recorder, drain) = AuditRecorder::spawn(Arc::new(sink.clone()));

        recorder.record(&ctx(), AuditEvent::new("x", "y"));
        drop(recorder);
        drain.await.unwrap();
        assert!(sink.records().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_drops_without_blocking() {
        let sink = MemoryAuditSink::new();
        let (recorder, drain) = AuditRecorder::with_capacity(Arc::new(sink.clone()), 2);
        let ctx = ctx();

        // The drain task cannot run until this task yields
        for _ in 0..5 {
            recorder.record(&ctx, AuditEvent::new("x", "y"));
        }
        assert_eq!(recorder.dropped(), 3);

        drop(recorder);
        drain.await.unwrap();
        assert_eq!(sink.records().len(), 2);
    }
}
