//! PostgreSQL audit repository backed by `opsflow_audit_log`.
//!
//! The table carries a trigger rejecting `UPDATE` and `DELETE`, so append-only holds
//! even for writers outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::repository::AuditRepository;
use crate::error::{OrchestratorError, Result};
use crate::models::{AuditLogEntry, AuditStatus};

#[derive(Debug, Clone)]
pub struct PgAuditRepository {
    pool: PgPool,
}

impl PgAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    tenant_id: String,
    actor_user_id: String,
    operation: String,
    resource_type: String,
    resource_id: String,
    old_value: Option<Value>,
    new_value: Option<Value>,
    correlated_task_id: Option<Uuid>,
    status: String,
    error_message: Option<String>,
}

impl TryFrom<AuditRow> for AuditLogEntry {
    type Error = OrchestratorError;

    fn try_from(row: AuditRow) -> Result<Self> {
        let status: AuditStatus = row.status.parse().map_err(OrchestratorError::storage)?;
        Ok(AuditLogEntry {
            id: row.id,
            created_at: row.created_at,
            tenant_id: row.tenant_id,
            actor_user_id: row.actor_user_id,
            operation: row.operation,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            old_value: row.old_value,
            new_value: row.new_value,
            correlated_task_id: row.correlated_task_id,
            status,
            error_message: row.error_message,
        })
    }
}

const SELECT_COLUMNS: &str = "id, created_at, tenant_id, actor_user_id, operation, resource_type, \
     resource_id, old_value, new_value, correlated_task_id, status, error_message";

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO opsflow_audit_log (
                id, created_at, tenant_id, actor_user_id, operation, resource_type,
                resource_id, old_value, new_value, correlated_task_id, status, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.id)
        .bind(entry.created_at)
        .bind(&entry.tenant_id)
        .bind(&entry.actor_user_id)
        .bind(&entry.operation)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.old_value)
        .bind(&entry.new_value)
        .bind(entry.correlated_task_id)
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn for_task(&self, tenant_id: &str, task_uuid: Uuid) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM opsflow_audit_log \
             WHERE tenant_id = $1 AND correlated_task_id = $2 \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(tenant_id)
        .bind(task_uuid)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AuditLogEntry::try_from).collect()
    }

    async fn recent(&self, tenant_id: &str, limit: usize) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM opsflow_audit_log \
             WHERE tenant_id = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(tenant_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AuditLogEntry::try_from).collect()
    }
}
