//! # Operation Gateway
//!
//! Every call runs the same pipeline: role check, rate limit for the call's
//! profile, the collaborator call, then an audit entry for mutations, whether
//! they succeeded or not. Reads are not audited.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::access::{require_class, AccessContext, OperationClass};
use crate::audit::{AuditLogger, AuditRecord};
use crate::collaborators::{
    Alert, Application, ApplicationResource, Branch, Collaborators, Dashboard, Folder,
    HistoryEntry, NewPullRequest, ObjectPage, PullRequest, PullRequestState, RenderParams,
    RenderStream, Repository, SignedUrlMethod, SignedUrlOptions,
};
use crate::constants::{resource_operations, resource_types, system::OBJECT_PAGE_SIZE};
use crate::error::{OrchestratorError, Result};
use crate::orchestration::OrchestratorContext;
use crate::rate_limit::{RateLimitProfile, RateLimiter};

#[derive(Debug, Clone)]
pub struct OperationGateway {
    collaborators: Collaborators,
    rate_limiter: RateLimiter,
    audit: Arc<AuditLogger>,
}

impl OperationGateway {
    pub fn new(collaborators: Collaborators, rate_limiter: RateLimiter, audit: Arc<AuditLogger>) -> Self {
        Self {
            collaborators,
            rate_limiter,
            audit,
        }
    }

    /// Gateway sharing the orchestrator's collaborators, limiter and audit log
    pub fn from_context(ctx: &OrchestratorContext) -> Self {
        Self::new(ctx.collaborators.clone(), ctx.rate_limiter.clone(), ctx.audit.clone())
    }

    async fn admit(&self, caller: &AccessContext, class: OperationClass, profile: RateLimitProfile) -> Result<()> {
        require_class(caller, class)?;
        self.rate_limiter
            .enforce(profile, &caller.rate_limit_key(), class)
            .await?;
        Ok(())
    }

    /// Record a mutation's outcome, then surface it
    async fn audited<T>(&self, record: AuditRecord, outcome: Result<T>) -> Result<T> {
        match &outcome {
            Ok(_) => self.audit.record(record).await,
            Err(e) => self.audit.record(record.failed(e.to_string())).await,
        }
        outcome
    }

    // Source control

    pub async fn list_repositories(&self, caller: &AccessContext) -> Result<Vec<Repository>> {
        self.admit(caller, OperationClass::Read, RateLimitProfile::General).await?;
        Ok(self.collaborators.source_control()?.list_repositories().await?)
    }

    pub async fn list_branches(&self, caller: &AccessContext, repo: &str) -> Result<Vec<Branch>> {
        self.admit(caller, OperationClass::Read, RateLimitProfile::General).await?;
        Ok(self.collaborators.source_control()?.list_branches(repo).await?)
    }

    pub async fn list_pull_requests(
        &self,
        caller: &AccessContext,
        repo: &str,
        state: PullRequestState,
    ) -> Result<Vec<PullRequest>> {
        self.admit(caller, OperationClass::Read, RateLimitProfile::General).await?;
        Ok(self
            .collaborators
            .source_control()?
            .list_pull_requests(repo, state)
            .await?)
    }

    #[instrument(skip(self, caller, request), fields(tenant_id = %caller.tenant_id, repo = %request.repo))]
    pub async fn create_pull_request(
        &self,
        caller: &AccessContext,
        request: &NewPullRequest,
    ) -> Result<PullRequest> {
        let record = AuditRecord::for_caller(
            caller,
            resource_operations::PULL_REQUEST_CREATE,
            resource_types::PULL_REQUEST,
            format!("{}:{}->{}", request.repo, request.head, request.base),
        )
        .new_value(json!({ "title": request.title, "head": request.head, "base": request.base }));

        let outcome = async {
            self.admit(caller, OperationClass::Mutation, RateLimitProfile::General).await?;
            let source_control = self.collaborators.source_control()?;
            Ok::<_, OrchestratorError>(source_control.create_pull_request(request).await?)
        }
        .await;
        self.audited(record, outcome).await
    }

    // Deployment

    pub async fn list_applications(
        &self,
        caller: &AccessContext,
        project: Option<&str>,
    ) -> Result<Vec<Application>> {
        self.admit(caller, OperationClass::Read, RateLimitProfile::General).await?;
        Ok(self.collaborators.deployment()?.list_applications(project).await?)
    }

    pub async fn application_history(&self, caller: &AccessContext, name: &str) -> Result<Vec<HistoryEntry>> {
        self.admit(caller, OperationClass::Read, RateLimitProfile::General).await?;
        Ok(self.collaborators.deployment()?.application_history(name).await?)
    }

    pub async fn application_resources(
        &self,
        caller: &AccessContext,
        name: &str,
    ) -> Result<Vec<ApplicationResource>> {
        self.admit(caller, OperationClass::Read, RateLimitProfile::General).await?;
        Ok(self.collaborators.deployment()?.application_resources(name).await?)
    }

    // Object storage

    pub async fn list_objects(
        &self,
        caller: &AccessContext,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: Option<u32>,
    ) -> Result<ObjectPage> {
        let max_keys = max_keys.unwrap_or(OBJECT_PAGE_SIZE).clamp(1, OBJECT_PAGE_SIZE);
        self.admit(caller, OperationClass::Read, RateLimitProfile::General).await?;
        Ok(self
            .collaborators
            .object_storage()?
            .list_objects(prefix, continuation_token, max_keys)
            .await?)
    }

    /// Download URLs need `USER`; upload URLs need `READWRITE` and are audited.
    pub async fn signed_url(
        &self,
        caller: &AccessContext,
        key: &str,
        method: SignedUrlMethod,
        options: &SignedUrlOptions,
    ) -> Result<String> {
        let sign = || async {
            let storage = self.collaborators.object_storage()?;
            Ok::<_, OrchestratorError>(storage.generate_signed_url(key, method, options).await?)
        };
        match method {
            SignedUrlMethod::Get => {
                self.admit(caller, OperationClass::Read, RateLimitProfile::General).await?;
                sign().await
            }
            SignedUrlMethod::Put => {
                // The URL itself is a bearer credential and is not recorded.
                let record = AuditRecord::for_caller(
                    caller,
                    resource_operations::OBJECT_SIGN_UPLOAD,
                    resource_types::OBJECT,
                    key,
                )
                .new_value(json!({
                    "method": method,
                    "expires_in_secs": options.expires_in.as_secs(),
                    "content_type": options.content_type,
                }));
                let outcome = async {
                    self.admit(caller, OperationClass::Mutation, RateLimitProfile::General).await?;
                    sign().await
                }
                .await;
                self.audited(record, outcome).await
            }
        }
    }

    #[instrument(skip(self, caller), fields(tenant_id = %caller.tenant_id))]
    pub async fn delete_object(&self, caller: &AccessContext, key: &str) -> Result<()> {
        let record = AuditRecord::for_caller(
            caller,
            resource_operations::OBJECT_DELETE,
            resource_types::OBJECT,
            key,
        )
        .old_value(json!({ "key": key }));

        let outcome = async {
            self.admit(caller, OperationClass::Destructive, RateLimitProfile::Bulk).await?;
            let storage = self.collaborators.object_storage()?;
            Ok::<_, OrchestratorError>(storage.delete_object(key).await?)
        }
        .await;
        self.audited(record, outcome).await?;
        debug!(key, "Object deleted");
        Ok(())
    }

    // Observability

    pub async fn render_url(&self, caller: &AccessContext, params: &RenderParams) -> Result<String> {
        self.admit(caller, OperationClass::Read, RateLimitProfile::Render).await?;
        Ok(self.collaborators.observability()?.render_url(params).await?)
    }

    /// Stream a rendered panel image without buffering it
    pub async fn proxy_render(&self, caller: &AccessContext, url: &str) -> Result<RenderStream> {
        self.admit(caller, OperationClass::Read, RateLimitProfile::Render).await?;
        Ok(self.collaborators.observability()?.proxy_render(url).await?)
    }

    pub async fn list_alerts(&self, caller: &AccessContext) -> Result<Vec<Alert>> {
        self.admit(caller, OperationClass::Read, RateLimitProfile::General).await?;
        Ok(self.collaborators.observability()?.list_alerts().await?)
    }

    pub async fn list_folders(&self, caller: &AccessContext) -> Result<Vec<Folder>> {
        self.admit(caller, OperationClass::Read, RateLimitProfile::General).await?;
        Ok(self.collaborators.observability()?.list_folders().await?)
    }

    pub async fn list_dashboards(&self, caller: &AccessContext) -> Result<Vec<Dashboard>> {
        self.admit(caller, OperationClass::Read, RateLimitProfile::General).await?;
        Ok(self.collaborators.observability()?.list_dashboards().await?)
    }
}
