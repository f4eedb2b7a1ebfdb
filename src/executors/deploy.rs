//! Deployment executors: sync one application to a revision, or refresh the
//! observed state of several. Both operations are idempotent downstream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::info;

use super::{audit_outcome, require_non_empty, scaled_progress};
use crate::collaborators::SyncOptions;
use crate::constants::{resource_operations, resource_types};
use crate::error::{OrchestratorError, Result};
use crate::models::TaskType;
use crate::orchestration::{parse_payload, ExecutionContext, ProgressHandle, TaskExecutor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploySyncPayload {
    pub application: String,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub prune: bool,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeploySyncExecutor;

#[async_trait]
impl TaskExecutor for DeploySyncExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::DeploySync
    }

    fn validate_payload(&self, payload: &Value) -> Result<()> {
        let payload: DeploySyncPayload = parse_payload(payload)?;
        require_non_empty("application", &payload.application)?;
        if let Some(revision) = &payload.revision {
            require_non_empty("revision", revision)?;
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, progress: &ProgressHandle) -> Result<Value> {
        let payload: DeploySyncPayload = ctx.payload()?;
        let deployment = ctx.collaborators().deployment()?;
        let message = format!("syncing {}", payload.application);
        progress.report(10, Some(message.as_str())).await?;

        let options = SyncOptions {
            revision: payload.revision.clone(),
            prune: payload.prune,
            dry_run: payload.dry_run,
        };
        let record = ctx
            .audit_record(
                resource_operations::APPLICATION_SYNC,
                resource_types::APPLICATION,
                payload.application.clone(),
            )
            .new_value(json!(options));
        let outcome = deployment.sync_application(&payload.application, &options).await;
        let result = audit_outcome(ctx, record, outcome).await?;
        progress.report(90, Some(result.phase.as_str())).await?;

        info!(
            application = %result.application,
            phase = %result.phase,
            dry_run = payload.dry_run,
            "Application synced"
        );
        Ok(json!(result))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployRefreshPayload {
    pub applications: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeployRefreshExecutor;

#[async_trait]
impl TaskExecutor for DeployRefreshExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::DeployRefresh
    }

    fn validate_payload(&self, payload: &Value) -> Result<()> {
        let payload: DeployRefreshPayload = parse_payload(payload)?;
        if payload.applications.is_empty() {
            return Err(OrchestratorError::validation("applications must not be empty"));
        }
        let mut seen = HashSet::new();
        for name in &payload.applications {
            require_non_empty("application", name)?;
            if !seen.insert(name) {
                return Err(OrchestratorError::validation(format!(
                    "application {name} listed twice"
                )));
            }
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, progress: &ProgressHandle) -> Result<Value> {
        let payload: DeployRefreshPayload = ctx.payload()?;
        let deployment = ctx.collaborators().deployment()?;

        let total = payload.applications.len();
        for (index, name) in payload.applications.iter().enumerate() {
            progress.check_cancelled()?;
            let record = ctx.audit_record(
                resource_operations::APPLICATION_REFRESH,
                resource_types::APPLICATION,
                name.clone(),
            );
            audit_outcome(ctx, record, deployment.refresh_application(name).await).await?;
            progress
                .report(scaled_progress(index + 1, total, 0, 95), Some(name.as_str()))
                .await?;
        }

        Ok(json!({ "refreshed": payload.applications }))
    }
}
