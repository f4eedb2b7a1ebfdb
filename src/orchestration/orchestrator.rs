//! # Orchestrator
//!
//! Public surface of the operation orchestrator. Every call takes the caller's
//! resolved [`AccessContext`]; mutating calls pass the role guard and the rate
//! limiter before touching the store, and are audited whether they succeed or
//! fail.
//!
//! ```rust,no_run
//! use opsflow_core::access::{AccessContext, Role};
//! use opsflow_core::collaborators::Collaborators;
//! use opsflow_core::config::OrchestratorConfig;
//! use opsflow_core::executors;
//! use opsflow_core::models::TaskType;
//! use opsflow_core::orchestration::{EnqueueRequest, Orchestrator, OrchestratorContext};
//!
//! # async fn example() -> opsflow_core::error::Result<()> {
//! let config = OrchestratorConfig::default();
//! let registry = executors::default_registry(&config.executors);
//! let ctx = OrchestratorContext::in_memory(config, Collaborators::new());
//! let orchestrator = Orchestrator::new(ctx, registry);
//! orchestrator.start()?;
//!
//! let caller = AccessContext::new("alice", "acme", Role::ReadWrite);
//! let task_uuid = orchestrator
//!     .enqueue_task(
//!         &caller,
//!         EnqueueRequest::new(TaskType::DeploySync, serde_json::json!({ "application": "billing" })),
//!     )
//!     .await?;
//! let mut events = orchestrator.subscribe_progress(&caller, Some(task_uuid)).await?;
//! while let Some(event) = events.recv().await {
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! orchestrator.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::context::OrchestratorContext;
use super::lifecycle::{operator_failure, TaskLifecycle};
use super::scheduler::Scheduler;
use super::task_executor::ExecutorRegistry;
use crate::access::{require_class, require_tenant, AccessContext, OperationClass};
use crate::audit::AuditRecord;
use crate::constants::{resource_types, task_operations};
use crate::error::{OrchestratorError, Result};
use crate::events::ProgressSubscription;
use crate::models::{
    AuditLogEntry, BackoffPolicy, CancelOutcome, NewTask, Task, TaskDependencyEdge, TaskFilter,
    TaskType,
};
use crate::rate_limit::RateLimitProfile;

/// Options for [`Orchestrator::enqueue_task`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub task_type: TaskType,
    pub payload: Value,
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
    #[serde(default)]
    pub priority: i32,
    /// Defaults to the configured `backoff.max_attempts`
    pub max_attempts: Option<u32>,
    /// Defaults to the configured backoff policy
    pub backoff_policy: Option<BackoffPolicy>,
}

impl EnqueueRequest {
    pub fn new(task_type: TaskType, payload: Value) -> Self {
        Self {
            task_type,
            payload,
            depends_on: Vec::new(),
            priority: 0,
            max_attempts: None,
            backoff_policy: None,
        }
    }

    pub fn depends_on(mut self, prerequisites: impl IntoIterator<Item = Uuid>) -> Self {
        self.depends_on.extend(prerequisites);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn backoff_policy(mut self, policy: BackoffPolicy) -> Self {
        self.backoff_policy = Some(policy);
        self
    }
}

pub struct Orchestrator {
    ctx: OrchestratorContext,
    registry: Arc<ExecutorRegistry>,
    lifecycle: TaskLifecycle,
    scheduler: Scheduler,
    shutdown_tx: watch::Sender<bool>,
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("scheduler", &self.scheduler)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(ctx: OrchestratorContext, registry: ExecutorRegistry) -> Self {
        let worker_id = ctx
            .config
            .scheduler
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("opsflow-worker-{}", Uuid::now_v7()));
        let registry = Arc::new(registry);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            lifecycle: TaskLifecycle::new(ctx.clone()),
            scheduler: Scheduler::new(ctx.clone(), registry.clone(), worker_id),
            ctx,
            registry,
            shutdown_tx,
            scheduler_handle: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &OrchestratorContext {
        &self.ctx
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Spawn the scheduler loop. Must be called inside a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.scheduler_handle.lock();
        if handle.is_some() {
            return Err(OrchestratorError::configuration("orchestrator already started"));
        }
        self.shutdown_tx.send_replace(false);
        let scheduler = self.scheduler.clone();
        *handle = Some(tokio::spawn(scheduler.run(self.shutdown_tx.subscribe())));
        info!(worker_id = %self.scheduler.worker_id(), "🚀 Orchestrator started");
        Ok(())
    }

    /// Stop claiming and wait for in-flight attempts to finish
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx.send_replace(true);
        let handle = self.scheduler_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler loop ended abnormally");
            }
        }
        let timeout = self.ctx.config.scheduler.shutdown_timeout();
        if !self.scheduler.drain(timeout).await {
            warn!(
                in_flight = self.scheduler.in_flight(),
                "In-flight attempts still running at shutdown; the reaper will retry them"
            );
        }
        info!("✅ Orchestrator shut down");
        Ok(())
    }

    async fn audit_failure(&self, caller: &AccessContext, operation: &str, resource_id: &str, error: &OrchestratorError) {
        self.ctx
            .audit
            .record(
                AuditRecord::for_caller(caller, operation, resource_types::TASK, resource_id)
                    .failed(error.to_string()),
            )
            .await;
    }

    /// Load a task and verify it belongs to the caller's tenant
    async fn load_owned(&self, caller: &AccessContext, task_uuid: Uuid) -> Result<Task> {
        let task = self
            .ctx
            .store
            .get_task(task_uuid)
            .await?
            .ok_or_else(|| OrchestratorError::not_found(format!("task {task_uuid}")))?;
        require_tenant(caller, &task.tenant_id)?;
        Ok(task)
    }

    /// Admit a task. Returns its id; execution outcome is observed through
    /// status polling or a progress subscription.
    #[instrument(skip(self, caller, request), fields(tenant_id = %caller.tenant_id, task_type = %request.task_type))]
    pub async fn enqueue_task(&self, caller: &AccessContext, request: EnqueueRequest) -> Result<Uuid> {
        let task_type = request.task_type;
        match self.try_enqueue(caller, request).await {
            Ok(task_uuid) => Ok(task_uuid),
            Err(e) => {
                self.audit_failure(caller, task_operations::ENQUEUE, task_type.as_str(), &e)
                    .await;
                Err(e)
            }
        }
    }

    async fn try_enqueue(&self, caller: &AccessContext, request: EnqueueRequest) -> Result<Uuid> {
        let class = request.task_type.operation_class();
        require_class(caller, class)?;
        self.ctx
            .rate_limiter
            .enforce(request.task_type.rate_limit_profile(), &caller.rate_limit_key(), class)
            .await?;

        self.registry
            .require(request.task_type)?
            .validate_payload(&request.payload)?;

        let max_attempts = request
            .max_attempts
            .unwrap_or(self.ctx.config.backoff.max_attempts);
        if max_attempts == 0 {
            return Err(OrchestratorError::validation("max_attempts must be at least 1"));
        }
        let backoff_policy = request
            .backoff_policy
            .unwrap_or_else(|| self.ctx.config.backoff.default_policy());
        backoff_policy.validate()?;

        let prerequisite_ids: BTreeSet<Uuid> = request.depends_on.iter().copied().collect();
        let mut prerequisites = Vec::with_capacity(prerequisite_ids.len());
        for prerequisite in &prerequisite_ids {
            prerequisites.push(self.load_owned(caller, *prerequisite).await?);
        }

        let task = NewTask {
            tenant_id: caller.tenant_id.clone(),
            actor_user_id: caller.actor_user_id.clone(),
            task_type: request.task_type,
            payload: request.payload,
            priority: request.priority,
            max_attempts,
            backoff_policy,
        }
        .into_task(Utc::now());

        let depends_on: Vec<Uuid> = prerequisite_ids.into_iter().collect();
        self.ctx.store.insert_task(&task, &depends_on).await?;
        self.lifecycle.enqueued(&task).await;

        // A prerequisite that already ended unsuccessfully dooms the new task
        for prerequisite in prerequisites
            .iter()
            .filter(|p| p.status.is_unsuccessful_terminal())
        {
            self.lifecycle.cascade(prerequisite).await?;
        }

        self.ctx.wake.notify_one();
        Ok(task.task_uuid)
    }

    pub async fn get_task_status(&self, caller: &AccessContext, task_uuid: Uuid) -> Result<Task> {
        require_class(caller, OperationClass::Read)?;
        self.load_owned(caller, task_uuid).await
    }

    pub async fn list_tasks(&self, caller: &AccessContext, filter: TaskFilter) -> Result<Vec<Task>> {
        require_class(caller, OperationClass::Read)?;
        self.ctx.store.list_tasks(&caller.tenant_id, &filter).await
    }

    /// Every audit entry correlated with the task, oldest first
    pub async fn task_audit_trail(&self, caller: &AccessContext, task_uuid: Uuid) -> Result<Vec<AuditLogEntry>> {
        require_class(caller, OperationClass::Read)?;
        let task = self.load_owned(caller, task_uuid).await?;
        self.ctx.audit.task_trail(&task.tenant_id, task_uuid).await
    }

    /// Subscribe to the caller's tenant, optionally narrowed to one task
    pub async fn subscribe_progress(
        &self,
        caller: &AccessContext,
        task_uuid: Option<Uuid>,
    ) -> Result<ProgressSubscription> {
        require_class(caller, OperationClass::Read)?;
        if let Some(task_uuid) = task_uuid {
            self.load_owned(caller, task_uuid).await?;
        }
        Ok(self.ctx.progress.subscribe(caller.tenant_id.clone(), task_uuid))
    }

    /// Cancel a task. Not-started tasks are cancelled at once; a running task is
    /// flagged and its executor aborts cooperatively. Terminal tasks are returned
    /// unchanged.
    #[instrument(skip(self, caller), fields(tenant_id = %caller.tenant_id))]
    pub async fn cancel_task(&self, caller: &AccessContext, task_uuid: Uuid) -> Result<Task> {
        match self.try_cancel(caller, task_uuid).await {
            Ok(task) => Ok(task),
            Err(e) => {
                self.audit_failure(caller, task_operations::CANCEL, &task_uuid.to_string(), &e)
                    .await;
                Err(e)
            }
        }
    }

    async fn try_cancel(&self, caller: &AccessContext, task_uuid: Uuid) -> Result<Task> {
        require_class(caller, OperationClass::Mutation)?;
        self.ctx
            .rate_limiter
            .enforce(RateLimitProfile::General, &caller.rate_limit_key(), OperationClass::Mutation)
            .await?;
        self.load_owned(caller, task_uuid).await?;

        let task = match self.ctx.store.request_cancel(task_uuid, Utc::now()).await? {
            CancelOutcome::Cancelled(task) => {
                self.lifecycle
                    .cancelled(&task, Some(&caller.actor_user_id))
                    .await?;
                task
            }
            CancelOutcome::Requested(task) => {
                self.scheduler.signal_cancel(task_uuid);
                self.lifecycle
                    .cancel_requested(&task, &caller.actor_user_id)
                    .await;
                task
            }
            CancelOutcome::AlreadyTerminal(task) => task,
        };
        self.ctx.wake.notify_one();
        Ok(task)
    }

    /// Make `dependent` wait for `depends_on`. Cycles are rejected.
    pub async fn add_dependency(&self, caller: &AccessContext, dependent: Uuid, depends_on: Uuid) -> Result<()> {
        match self.try_add_dependency(caller, dependent, depends_on).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.audit_failure(caller, task_operations::ADD_DEPENDENCY, &dependent.to_string(), &e)
                    .await;
                Err(e)
            }
        }
    }

    async fn try_add_dependency(&self, caller: &AccessContext, dependent: Uuid, depends_on: Uuid) -> Result<()> {
        require_class(caller, OperationClass::Mutation)?;
        self.ctx
            .rate_limiter
            .enforce(RateLimitProfile::General, &caller.rate_limit_key(), OperationClass::Mutation)
            .await?;
        let dependent_task = self.load_owned(caller, dependent).await?;
        let prerequisite = self.load_owned(caller, depends_on).await?;

        let edge = TaskDependencyEdge::new(dependent, depends_on, caller.tenant_id.clone(), Utc::now());
        self.ctx.store.add_dependency(&edge).await?;
        self.ctx
            .audit
            .record(
                AuditRecord::for_caller(
                    caller,
                    task_operations::ADD_DEPENDENCY,
                    resource_types::TASK,
                    dependent.to_string(),
                )
                .correlated_task(dependent_task.task_uuid)
                .new_value(json!({ "depends_on": depends_on })),
            )
            .await;

        self.lifecycle.cascade(&prerequisite).await
    }

    /// Operator failure of a task that has not started; cascades to dependents
    pub async fn fail_task(&self, caller: &AccessContext, task_uuid: Uuid, reason: &str) -> Result<Task> {
        match self.try_fail(caller, task_uuid, reason).await {
            Ok(task) => Ok(task),
            Err(e) => {
                self.audit_failure(caller, task_operations::FAIL, &task_uuid.to_string(), &e)
                    .await;
                Err(e)
            }
        }
    }

    async fn try_fail(&self, caller: &AccessContext, task_uuid: Uuid, reason: &str) -> Result<Task> {
        require_class(caller, OperationClass::Destructive)?;
        self.ctx
            .rate_limiter
            .enforce(RateLimitProfile::General, &caller.rate_limit_key(), OperationClass::Destructive)
            .await?;
        let current = self.load_owned(caller, task_uuid).await?;

        let task = self
            .ctx
            .store
            .force_fail(task_uuid, operator_failure(reason, current.attempt), Utc::now())
            .await?;
        self.lifecycle.force_failed(&task, &caller.actor_user_id).await?;
        self.ctx.wake.notify_one();
        Ok(task)
    }
}
