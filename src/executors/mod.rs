//! # Executors
//!
//! The built-in [`TaskExecutor`]s, one per [`TaskType`](crate::models::TaskType).
//! Each validates its payload at enqueue time, reports progress through the
//! [`ProgressHandle`](crate::orchestration::ProgressHandle), and audits every
//! external write it performs with the task as correlation.
//!
//! Every executor is safe to re-attempt. Writes are check-then-act (branches,
//! pull requests), revision-guarded (file contents), or idempotent (syncs,
//! refreshes, deletions).

pub mod bulk_update;
pub mod deploy;
pub mod object_cleanup;
pub mod pr_workflow;

use std::sync::Arc;

use crate::audit::AuditRecord;
use crate::collaborators::CollaboratorResult;
use crate::config::ExecutorsConfig;
use crate::error::{OrchestratorError, Result};
use crate::orchestration::{ExecutionContext, ExecutorRegistry};

pub use bulk_update::{BulkUpdateExecutor, BulkUpdatePayload, FileEdit, PullRequestSpec};
pub use deploy::{DeployRefreshExecutor, DeployRefreshPayload, DeploySyncExecutor, DeploySyncPayload};
pub use object_cleanup::{ObjectCleanupExecutor, ObjectCleanupPayload};
pub use pr_workflow::{PrWorkflowExecutor, PrWorkflowPayload};

/// Registry with every built-in executor
pub fn default_registry(limits: &ExecutorsConfig) -> ExecutorRegistry {
    ExecutorRegistry::new(limits.clone())
        .with(Arc::new(BulkUpdateExecutor))
        .with(Arc::new(DeploySyncExecutor))
        .with(Arc::new(DeployRefreshExecutor))
        .with(Arc::new(PrWorkflowExecutor))
        .with(Arc::new(ObjectCleanupExecutor))
}

/// Audit a collaborator write as succeeded or failed, then surface its result
pub(crate) async fn audit_outcome<T>(
    ctx: &ExecutionContext,
    record: AuditRecord,
    outcome: CollaboratorResult<T>,
) -> Result<T> {
    match outcome {
        Ok(value) => {
            ctx.audit(record).await;
            Ok(value)
        }
        Err(error) => {
            ctx.audit(record.failed(error.to_string())).await;
            Err(error.into())
        }
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(OrchestratorError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Progress for item `done` of `total`, spread over `[from, to]`
pub(crate) fn scaled_progress(done: usize, total: usize, from: u8, to: u8) -> u8 {
    if total == 0 {
        return to;
    }
    let span = usize::from(to.saturating_sub(from));
    from + (span * done.min(total) / total) as u8
}
