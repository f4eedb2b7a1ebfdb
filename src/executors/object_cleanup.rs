//! Deletes every object under a storage prefix, page by page.
//!
//! A re-attempt lists what is left and continues; deleting an absent key is a
//! no-op downstream. Cancellation is checked before each deletion.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{audit_outcome, require_non_empty};
use crate::constants::{resource_operations, resource_types, system::OBJECT_PAGE_SIZE};
use crate::error::{OrchestratorError, Result};
use crate::models::TaskType;
use crate::orchestration::{parse_payload, ExecutionContext, ProgressHandle, TaskExecutor};

/// Progress is unknown until the listing ends; each page advances it by this
/// much, up to `PAGE_PROGRESS_CEILING`.
const PAGE_PROGRESS_STEP: u8 = 10;
const PAGE_PROGRESS_CEILING: u8 = 90;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectCleanupPayload {
    pub prefix: String,
    /// Count matching objects without deleting them
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectCleanupExecutor;

#[async_trait]
impl TaskExecutor for ObjectCleanupExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::ObjectCleanup
    }

    fn validate_payload(&self, payload: &Value) -> Result<()> {
        let payload: ObjectCleanupPayload = parse_payload(payload)?;
        // An empty prefix would match the whole bucket.
        require_non_empty("prefix", &payload.prefix)?;
        if payload.prefix == "/" {
            return Err(OrchestratorError::validation("prefix must not be the bucket root"));
        }
        if payload.page_size == Some(0) {
            return Err(OrchestratorError::validation("page_size must be positive"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, progress: &ProgressHandle) -> Result<Value> {
        let payload: ObjectCleanupPayload = ctx.payload()?;
        let storage = ctx.collaborators().object_storage()?;
        let page_size = payload.page_size.unwrap_or(OBJECT_PAGE_SIZE);

        let mut matched = 0usize;
        let mut deleted = 0usize;
        let mut token: Option<String> = None;
        let mut pages = 0u8;
        loop {
            let page = storage
                .list_objects(&payload.prefix, token.as_deref(), page_size)
                .await?;
            matched += page.objects.len();

            for object in &page.objects {
                progress.check_cancelled()?;
                if payload.dry_run {
                    continue;
                }
                let record = ctx
                    .audit_record(resource_operations::OBJECT_DELETE, resource_types::OBJECT, object.key.clone())
                    .old_value(json!({ "key": object.key, "size": object.size }));
                audit_outcome(ctx, record, storage.delete_object(&object.key).await).await?;
                deleted += 1;
            }

            pages = pages.saturating_add(1);
            let percent = PAGE_PROGRESS_STEP
                .saturating_mul(pages)
                .min(PAGE_PROGRESS_CEILING);
            let message = format!("{matched} objects processed");
            progress.report(percent, Some(message.as_str())).await?;
            debug!(prefix = %payload.prefix, matched, deleted, "Processed object page");

            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        info!(prefix = %payload.prefix, matched, deleted, dry_run = payload.dry_run, "Object cleanup finished");
        Ok(json!({
            "prefix": payload.prefix,
            "matched": matched,
            "deleted": deleted,
            "dry_run": payload.dry_run,
        }))
    }
}
