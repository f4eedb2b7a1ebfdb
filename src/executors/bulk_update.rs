//! # Bulk Update
//!
//! Applies a set of file edits to a configuration repository on a working branch,
//! then optionally opens a pull request for review.
//!
//! Re-attempts converge: the branch is created only if missing, files already
//! holding the target content are skipped, and each write is guarded by the
//! revision read just before it, so a concurrent edit fails the attempt with a
//! retryable conflict instead of being overwritten.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info};

use super::pr_workflow::ensure_pull_request;
use super::{audit_outcome, require_non_empty, scaled_progress};
use crate::collaborators::{CollaboratorError, FileWrite, NewPullRequest, SourceControl};
use crate::constants::{resource_operations, resource_types};
use crate::error::{OrchestratorError, Result};
use crate::models::TaskType;
use crate::orchestration::{parse_payload, ExecutionContext, ProgressHandle, TaskExecutor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileEdit {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PullRequestSpec {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkUpdatePayload {
    pub repo: String,
    /// Working branch the edits land on
    pub branch: String,
    /// Branch to fork from and target with the pull request; the repository
    /// default when omitted
    #[serde(default)]
    pub base_branch: Option<String>,
    pub commit_message: String,
    pub files: Vec<FileEdit>,
    #[serde(default)]
    pub pull_request: Option<PullRequestSpec>,
}

impl BulkUpdatePayload {
    fn validate(&self) -> Result<()> {
        require_non_empty("repo", &self.repo)?;
        require_non_empty("branch", &self.branch)?;
        require_non_empty("commit_message", &self.commit_message)?;
        if self.base_branch.as_deref() == Some(self.branch.as_str()) {
            return Err(OrchestratorError::validation("branch and base_branch must differ"));
        }
        if self.files.is_empty() {
            return Err(OrchestratorError::validation("files must not be empty"));
        }
        let mut seen = HashSet::new();
        for file in &self.files {
            validate_path(&file.path)?;
            if !seen.insert(file.path.as_str()) {
                return Err(OrchestratorError::validation(format!(
                    "duplicate file path {}",
                    file.path
                )));
            }
        }
        if let Some(pr) = &self.pull_request {
            require_non_empty("pull_request.title", &pr.title)?;
        }
        Ok(())
    }
}

fn validate_path(path: &str) -> Result<()> {
    require_non_empty("file path", path)?;
    if path.starts_with('/') || path.split('/').any(|segment| segment == ".." || segment.is_empty()) {
        return Err(OrchestratorError::validation(format!(
            "file path {path} must be relative and normalized"
        )));
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BulkUpdateExecutor;

#[async_trait]
impl TaskExecutor for BulkUpdateExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::BulkUpdate
    }

    fn validate_payload(&self, payload: &Value) -> Result<()> {
        parse_payload::<BulkUpdatePayload>(payload)?.validate()
    }

    async fn execute(&self, ctx: &ExecutionContext, progress: &ProgressHandle) -> Result<Value> {
        let payload: BulkUpdatePayload = ctx.payload()?;
        let source_control = ctx.collaborators().source_control()?.as_ref();

        let base_branch = match &payload.base_branch {
            Some(base) => base.clone(),
            None => default_branch(source_control, &payload.repo).await?,
        };
        let branch_created =
            ensure_branch(ctx, source_control, &payload.repo, &payload.branch, &base_branch).await?;
        progress.report(5, Some("branch ready")).await?;

        let total = payload.files.len();
        let mut updated = Vec::new();
        let mut unchanged = Vec::new();
        for (index, edit) in payload.files.iter().enumerate() {
            progress.check_cancelled()?;
            let changed = apply_edit(ctx, source_control, &payload, edit).await?;
            if changed {
                updated.push(edit.path.clone());
            } else {
                unchanged.push(edit.path.clone());
            }
            progress
                .report(scaled_progress(index + 1, total, 10, 90), Some(edit.path.as_str()))
                .await?;
        }

        let pull_request = match &payload.pull_request {
            Some(spec) => {
                progress.check_cancelled()?;
                let request = NewPullRequest {
                    repo: payload.repo.clone(),
                    title: spec.title.clone(),
                    head: payload.branch.clone(),
                    base: base_branch.clone(),
                    body: spec.body.clone(),
                };
                let (pr, _) = ensure_pull_request(ctx, source_control, &request).await?;
                Some(pr)
            }
            None => None,
        };

        info!(
            repo = %payload.repo,
            branch = %payload.branch,
            updated = updated.len(),
            unchanged = unchanged.len(),
            "Bulk update applied"
        );
        Ok(json!({
            "repo": payload.repo,
            "branch": payload.branch,
            "base_branch": base_branch,
            "branch_created": branch_created,
            "updated": updated,
            "unchanged": unchanged,
            "pull_request": pull_request,
        }))
    }
}

async fn default_branch(source_control: &dyn SourceControl, repo: &str) -> Result<String> {
    source_control
        .list_repositories()
        .await?
        .into_iter()
        .find(|r| r.name == repo)
        .map(|r| r.default_branch)
        .ok_or_else(|| OrchestratorError::not_found(format!("repository {repo}")))
}

/// Create `branch` from `base` unless it exists. `true` when this call created it.
async fn ensure_branch(
    ctx: &ExecutionContext,
    source_control: &dyn SourceControl,
    repo: &str,
    branch: &str,
    base: &str,
) -> Result<bool> {
    let branches = source_control.list_branches(repo).await?;
    if branches.iter().any(|b| b.name == branch) {
        debug!(repo, branch, "Branch already exists");
        return Ok(false);
    }

    let record = ctx
        .audit_record(
            resource_operations::BRANCH_CREATE,
            resource_types::BRANCH,
            format!("{repo}:{branch}"),
        )
        .new_value(json!({ "from": base }));
    match source_control.create_branch(repo, branch, base).await {
        // Lost a race with another writer; the branch is there either way.
        Err(CollaboratorError::Conflict(_)) => Ok(false),
        outcome => audit_outcome(ctx, record, outcome).await.map(|_| true),
    }
}

/// Write one file if its content differs. `true` when a write happened.
async fn apply_edit(
    ctx: &ExecutionContext,
    source_control: &dyn SourceControl,
    payload: &BulkUpdatePayload,
    edit: &FileEdit,
) -> Result<bool> {
    let current = source_control
        .get_file(&payload.repo, &payload.branch, &edit.path)
        .await?;
    if current.as_ref().is_some_and(|c| c.content == edit.content) {
        debug!(path = %edit.path, "File already up to date");
        return Ok(false);
    }

    let old_value = current
        .as_ref()
        .map_or(Value::Null, |c| json!({ "content": c.content, "revision": c.revision }));
    let record = ctx
        .audit_record(
            resource_operations::FILE_UPDATE,
            resource_types::FILE,
            format!("{}:{}:{}", payload.repo, payload.branch, edit.path),
        )
        .old_value(old_value)
        .new_value(json!({ "content": edit.content }));
    let write = FileWrite {
        repo: payload.repo.clone(),
        branch: payload.branch.clone(),
        path: edit.path.clone(),
        content: edit.content.clone(),
        message: payload.commit_message.clone(),
        expected_revision: current.map(|c| c.revision),
    };
    audit_outcome(ctx, record, source_control.put_file(&write).await).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Collaborators, InMemorySourceControl};
    use crate::executors::testing::Harness;
    use crate::models::AuditStatus;
    use std::sync::Arc;

    fn payload() -> Value {
        json!({
            "repo": "infra",
            "branch": "ops/raise-replicas",
            "commit_message": "Raise replicas",
            "files": [
                { "path": "apps/billing/values.yaml", "content": "replicas: 3\n" },
                { "path": "apps/search/values.yaml", "content": "replicas: 2\n" },
            ],
            "pull_request": { "title": "Raise replicas" },
        })
    }

    fn repository() -> Arc<InMemorySourceControl> {
        Arc::new(
            InMemorySourceControl::new()
                .with_repository("infra", "main")
                .with_file("infra", "main", "apps/billing/values.yaml", "replicas: 1\n")
                .with_file("infra", "main", "apps/search/values.yaml", "replicas: 2\n"),
        )
    }

    #[test]
    fn test_validation() {
        assert!(BulkUpdateExecutor.validate_payload(&payload()).is_ok());

        let mut bad = payload();
        bad["files"] = json!([]);
        assert!(BulkUpdateExecutor.validate_payload(&bad).is_err());

        let mut traversal = payload();
        traversal["files"][0]["path"] = json!("../secrets.yaml");
        assert!(BulkUpdateExecutor.validate_payload(&traversal).is_err());

        let mut duplicate = payload();
        duplicate["files"][1]["path"] = json!("apps/billing/values.yaml");
        assert!(BulkUpdateExecutor.validate_payload(&duplicate).is_err());

        let mut unknown = payload();
        unknown["force"] = json!(true);
        assert!(BulkUpdateExecutor.validate_payload(&unknown).is_err());
    }

    #[tokio::test]
    async fn test_applies_changed_files_and_opens_pull_request() {
        let scm = repository();
        let harness = Harness::claim(
            TaskType::BulkUpdate,
            payload(),
            Collaborators::new().with_source_control(scm.clone()),
        )
        .await;

        let result = harness.run(&BulkUpdateExecutor).await.unwrap();
        assert_eq!(result["base_branch"], "main");
        assert_eq!(result["branch_created"], true);
        assert_eq!(result["updated"], json!(["apps/billing/values.yaml"]));
        assert_eq!(result["unchanged"], json!(["apps/search/values.yaml"]));
        assert_eq!(result["pull_request"]["head"], "ops/raise-replicas");

        let file = scm
            .file("infra", "ops/raise-replicas", "apps/billing/values.yaml")
            .unwrap();
        assert_eq!(file.content, "replicas: 3\n");
        assert_eq!(harness.progress.percent(), 90);

        let trail = harness.trail().await;
        let operations: Vec<_> = trail.iter().map(|e| e.operation.as_str()).collect();
        assert_eq!(
            operations,
            vec![
                resource_operations::BRANCH_CREATE,
                resource_operations::FILE_UPDATE,
                resource_operations::PULL_REQUEST_CREATE,
            ]
        );
        let file_entry = &trail[1];
        assert_eq!(file_entry.old_value.as_ref().unwrap()["content"], "replicas: 1\n");
        assert_eq!(file_entry.new_value.as_ref().unwrap()["content"], "replicas: 3\n");
    }

    #[tokio::test]
    async fn test_reattempt_converges_without_duplicate_writes() {
        let scm = repository();
        let collaborators = Collaborators::new().with_source_control(scm.clone());

        Harness::claim(TaskType::BulkUpdate, payload(), collaborators.clone())
            .await
            .run(&BulkUpdateExecutor)
            .await
            .unwrap();
        let again = Harness::claim(TaskType::BulkUpdate, payload(), collaborators).await;
        let result = again.run(&BulkUpdateExecutor).await.unwrap();

        assert_eq!(result["branch_created"], false);
        assert_eq!(result["updated"], json!([]));
        assert_eq!(scm.pull_requests("infra").len(), 1);
        assert!(again.trail().await.is_empty());
    }

    #[tokio::test]
    async fn test_write_conflict_is_audited_and_retryable() {
        let scm = repository();
        scm.fail_next([
            CollaboratorError::Conflict("branch exists".into()),
            CollaboratorError::Conflict("sha mismatch".into()),
        ]);
        let harness = Harness::claim(
            TaskType::BulkUpdate,
            payload(),
            Collaborators::new().with_source_control(scm),
        )
        .await;

        let err = harness.run(&BulkUpdateExecutor).await.unwrap_err();
        assert!(err.is_retryable());

        let trail = harness.trail().await;
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].operation, resource_operations::FILE_UPDATE);
        assert_eq!(trail[0].status, AuditStatus::Failure);
    }

    #[tokio::test]
    async fn test_stops_when_cancelled() {
        let harness = Harness::claim(
            TaskType::BulkUpdate,
            payload(),
            Collaborators::new().with_source_control(repository()),
        )
        .await;
        harness.cancel.send(true).unwrap();

        let err = harness.run(&BulkUpdateExecutor).await.unwrap_err();
        assert_eq!(err.code(), "CANCELLED");
    }
}
