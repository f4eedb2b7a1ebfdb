//! Opens a pull request between two branches unless one is already open.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::{audit_outcome, require_non_empty};
use crate::collaborators::{NewPullRequest, PullRequest, PullRequestState, SourceControl};
use crate::constants::{resource_operations, resource_types};
use crate::error::{OrchestratorError, Result};
use crate::models::TaskType;
use crate::orchestration::{parse_payload, ExecutionContext, ProgressHandle, TaskExecutor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrWorkflowPayload {
    pub repo: String,
    pub head: String,
    pub base: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

impl PrWorkflowPayload {
    fn validate(&self) -> Result<()> {
        require_non_empty("repo", &self.repo)?;
        require_non_empty("head", &self.head)?;
        require_non_empty("base", &self.base)?;
        require_non_empty("title", &self.title)?;
        if self.head == self.base {
            return Err(OrchestratorError::validation("head and base must differ"));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PrWorkflowExecutor;

#[async_trait]
impl TaskExecutor for PrWorkflowExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::PrWorkflow
    }

    fn validate_payload(&self, payload: &Value) -> Result<()> {
        parse_payload::<PrWorkflowPayload>(payload)?.validate()
    }

    async fn execute(&self, ctx: &ExecutionContext, progress: &ProgressHandle) -> Result<Value> {
        let payload: PrWorkflowPayload = ctx.payload()?;
        let source_control = ctx.collaborators().source_control()?;
        progress.report(10, Some("checking open pull requests")).await?;

        let request = NewPullRequest {
            repo: payload.repo,
            title: payload.title,
            head: payload.head,
            base: payload.base,
            body: payload.body,
        };
        let (pull_request, created) = ensure_pull_request(ctx, source_control.as_ref(), &request).await?;
        progress.report(100, None).await?;

        Ok(json!({
            "pull_request": pull_request,
            "created": created,
        }))
    }
}

/// Return the open pull request for `head -> base`, opening one if none exists.
///
/// The flag is `true` when this call created it.
pub(crate) async fn ensure_pull_request(
    ctx: &ExecutionContext,
    source_control: &dyn SourceControl,
    request: &NewPullRequest,
) -> Result<(PullRequest, bool)> {
    let open = source_control
        .list_pull_requests(&request.repo, PullRequestState::Open)
        .await?;
    if let Some(existing) = open
        .into_iter()
        .find(|pr| pr.head == request.head && pr.base == request.base)
    {
        info!(repo = %request.repo, number = existing.number, "Pull request already open");
        return Ok((existing, false));
    }

    let record = ctx
        .audit_record(
            resource_operations::PULL_REQUEST_CREATE,
            resource_types::PULL_REQUEST,
            format!("{}:{}->{}", request.repo, request.head, request.base),
        )
        .new_value(json!({ "title": request.title, "head": request.head, "base": request.base }));
    let created = audit_outcome(ctx, record, source_control.create_pull_request(request).await).await?;
    info!(repo = %request.repo, number = created.number, "Opened pull request");
    Ok((created, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Collaborators, InMemorySourceControl};
    use crate::executors::testing::Harness;
    use crate::models::AuditStatus;
    use std::sync::Arc;

    fn payload() -> Value {
        json!({ "repo": "infra", "head": "feature/dns", "base": "main", "title": "Move DNS" })
    }

    #[test]
    fn test_rejects_same_head_and_base() {
        let err = PrWorkflowExecutor
            .validate_payload(&json!({ "repo": "infra", "head": "main", "base": "main", "title": "x" }))
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
        assert!(PrWorkflowExecutor.validate_payload(&json!({ "repo": "infra" })).is_err());
        assert!(PrWorkflowExecutor.validate_payload(&payload()).is_ok());
    }

    #[tokio::test]
    async fn test_second_attempt_reuses_open_pull_request() {
        let scm = Arc::new(InMemorySourceControl::new().with_repository("infra", "main"));
        let collaborators = Collaborators::new().with_source_control(scm.clone());

        let first = Harness::claim(TaskType::PrWorkflow, payload(), collaborators.clone()).await;
        let result = first.run(&PrWorkflowExecutor).await.unwrap();
        assert_eq!(result["created"], true);

        let second = Harness::claim(TaskType::PrWorkflow, payload(), collaborators).await;
        let result = second.run(&PrWorkflowExecutor).await.unwrap();
        assert_eq!(result["created"], false);
        assert_eq!(result["pull_request"]["number"], 1);
        assert_eq!(scm.pull_requests("infra").len(), 1);

        let trail = first.trail().await;
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].operation, resource_operations::PULL_REQUEST_CREATE);
        assert_eq!(trail[0].status, AuditStatus::Success);
        assert!(second.trail().await.is_empty());
    }
}
