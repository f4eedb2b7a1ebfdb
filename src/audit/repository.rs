//! Append-only storage for audit entries.

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::models::AuditLogEntry;

/// Write-once audit storage. There is deliberately no update or delete.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()>;

    /// Entries correlated with a task, oldest first
    async fn for_task(&self, tenant_id: &str, task_uuid: Uuid) -> Result<Vec<AuditLogEntry>>;

    /// Most recent entries for a tenant, newest first
    async fn recent(&self, tenant_id: &str, limit: usize) -> Result<Vec<AuditLogEntry>>;
}

/// Process-local audit log for tests and single-node use
#[derive(Debug, Default)]
pub struct InMemoryAuditRepository {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of every entry in append order
    pub fn all(&self) -> Vec<AuditLogEntry> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    async fn for_task(&self, tenant_id: &str, task_uuid: Uuid) -> Result<Vec<AuditLogEntry>> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.correlated_task_id == Some(task_uuid))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn recent(&self, tenant_id: &str, limit: usize) -> Result<Vec<AuditLogEntry>> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        entries.truncate(limit);
        Ok(entries)
    }
}
