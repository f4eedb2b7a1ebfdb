//! # Audit Logger
//!
//! Records one entry per attempted mutating operation, synchronous or task-based,
//! including failures. Task lifecycle entries carry `correlated_task_id` so a task's
//! full trail can be replayed.
//!
//! Audit writes never fail the operation being audited: a repository error is
//! logged and the operation proceeds.

use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::repository::{AuditRepository, InMemoryAuditRepository};
use crate::access::AccessContext;
use crate::error::Result;
use crate::models::{AuditLogEntry, AuditStatus};

/// An audit entry before it is stamped with an id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub tenant_id: String,
    pub actor_user_id: String,
    pub operation: String,
    pub resource_type: String,
    pub resource_id: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub correlated_task_id: Option<Uuid>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
}

impl AuditRecord {
    pub fn new(
        tenant_id: impl Into<String>,
        actor_user_id: impl Into<String>,
        operation: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_user_id: actor_user_id.into(),
            operation: operation.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            old_value: None,
            new_value: None,
            correlated_task_id: None,
            status: AuditStatus::Success,
            error_message: None,
        }
    }

    /// Record attributed to the caller of a synchronous operation
    pub fn for_caller(
        ctx: &AccessContext,
        operation: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self::new(
            ctx.tenant_id.clone(),
            ctx.actor_user_id.clone(),
            operation,
            resource_type,
            resource_id,
        )
    }

    pub fn old_value(mut self, value: Value) -> Self {
        self.old_value = Some(value);
        self
    }

    pub fn new_value(mut self, value: Value) -> Self {
        self.new_value = Some(value);
        self
    }

    pub fn correlated_task(mut self, task_uuid: Uuid) -> Self {
        self.correlated_task_id = Some(task_uuid);
        self
    }

    pub fn pending(mut self) -> Self {
        self.status = AuditStatus::Pending;
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = AuditStatus::Failure;
        self.error_message = Some(message.into());
        self
    }
}

/// Next audit timestamp after `last`.
///
/// Stamps carry microsecond precision, the resolution PostgreSQL stores, so two
/// stamps that differ only below a microsecond cannot tie once persisted.
fn stamp_after(last: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(6);
    if now > last {
        now
    } else {
        last + chrono::Duration::microseconds(1)
    }
}

/// Stamps records and appends them to an [`AuditRepository`].
///
/// Timestamps handed out by one logger are strictly increasing at microsecond
/// resolution, so entries written in sequence sort in the order they were recorded.
pub struct AuditLogger {
    repository: Arc<dyn AuditRepository>,
    last_stamp: Mutex<DateTime<Utc>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger").finish_non_exhaustive()
    }
}

impl AuditLogger {
    pub fn new(repository: Arc<dyn AuditRepository>) -> Self {
        Self {
            repository,
            last_stamp: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryAuditRepository::new()))
    }

    pub fn repository(&self) -> &Arc<dyn AuditRepository> {
        &self.repository
    }

    fn next_stamp(&self) -> DateTime<Utc> {
        let mut last = self.last_stamp.lock();
        let stamp = stamp_after(*last, Utc::now());
        *last = stamp;
        stamp
    }

    /// Append a record, returning the stored entry
    pub async fn try_record(&self, record: AuditRecord) -> Result<AuditLogEntry> {
        let entry = AuditLogEntry {
            id: Uuid::now_v7(),
            created_at: self.next_stamp(),
            tenant_id: record.tenant_id,
            actor_user_id: record.actor_user_id,
            operation: record.operation,
            resource_type: record.resource_type,
            resource_id: record.resource_id,
            old_value: record.old_value,
            new_value: record.new_value,
            correlated_task_id: record.correlated_task_id,
            status: record.status,
            error_message: record.error_message,
        };
        self.repository.append(&entry).await?;
        Ok(entry)
    }

    /// Append a record; repository failures are logged, not returned
    pub async fn record(&self, record: AuditRecord) {
        let operation = record.operation.clone();
        let resource_id = record.resource_id.clone();
        if let Err(e) = self.try_record(record).await {
            error!(
                operation = %operation,
                resource_id = %resource_id,
                error = %e,
                "Failed to write audit entry"
            );
        }
    }

    pub async fn task_trail(&self, tenant_id: &str, task_uuid: Uuid) -> Result<Vec<AuditLogEntry>> {
        self.repository.for_task(tenant_id, task_uuid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;

    #[test]
    fn test_stamps_within_one_microsecond_do_not_tie() {
        use chrono::{TimeZone, Timelike};

        let last = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::microseconds(10);
        let same_micro = last + chrono::Duration::nanoseconds(400);
        let next = stamp_after(last, same_micro);
        assert_eq!(next, last + chrono::Duration::microseconds(1));

        let later = last + chrono::Duration::nanoseconds(5_700);
        let stamp = stamp_after(last, later);
        assert_eq!(stamp, last + chrono::Duration::microseconds(5));
        assert_eq!(stamp.nanosecond() % 1_000, 0);

        let earlier = last - chrono::Duration::seconds(1);
        assert_eq!(stamp_after(last, earlier), last + chrono::Duration::microseconds(1));
    }

    #[tokio::test]
    async fn test_records_are_stamped_in_order() {
        let repo = Arc::new(InMemoryAuditRepository::new());
        let logger = AuditLogger::new(repo.clone());
        let task = Uuid::now_v7();

        for op in ["task.enqueue", "task.claim", "task.succeed"] {
            logger
                .record(AuditRecord::new("acme", "alice", op, "task", task.to_string()).correlated_task(task))
                .await;
        }

        let trail = logger.task_trail("acme", task).await.unwrap();
        assert_eq!(trail.len(), 3);
        assert!(trail.windows(2).all(|w| w[0].created_at < w[1].created_at));
        assert_eq!(trail[2].operation, "task.succeed");
        assert!(logger.task_trail("other", task).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_record_carries_message() {
        let logger = AuditLogger::in_memory();
        let ctx = AccessContext::new("bob", "acme", Role::Admin);
        let entry = logger
            .try_record(
                AuditRecord::for_caller(&ctx, "object.delete", "object", "logs/a.txt")
                    .old_value(serde_json::json!("logs/a.txt"))
                    .failed("bucket unavailable"),
            )
            .await
            .unwrap();
        assert_eq!(entry.status, AuditStatus::Failure);
        assert_eq!(entry.error_message.as_deref(), Some("bucket unavailable"));
        assert_eq!(entry.actor_user_id, "bob");
        assert_eq!(entry.tenant_id, "acme");
    }
}
