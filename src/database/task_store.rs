//! # Task Store
//!
//! Durable owner of [`Task`] and [`TaskDependencyEdge`] state. Every mutation the
//! scheduler, the retry engine and the orchestrator API perform goes through this
//! trait, and every implementation must make each method atomic with respect to
//! concurrent callers in other processes.
//!
//! Post-claim writes take a [`ClaimToken`] and only apply while the task is still
//! `Running` at the token's attempt. A worker whose claim was reaped therefore
//! cannot overwrite a newer attempt; those methods report a stale token as
//! `Ok(None)` / `Ok(false)` rather than an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AttemptOutcome, CancelOutcome, ClaimToken, Task, TaskDependencyEdge, TaskFailure, TaskFilter,
    TaskType,
};

/// Parameters for claiming the next task of one tenant
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub tenant_id: String,
    pub worker_id: String,
    /// Task types this replica can execute, with each type's maximum duration
    pub executable: Vec<(TaskType, Duration)>,
    /// Running tasks allowed for the tenant, across all replicas
    pub tenant_cap: usize,
    pub now: DateTime<Utc>,
}

impl ClaimRequest {
    pub fn task_types(&self) -> Vec<TaskType> {
        self.executable.iter().map(|(t, _)| *t).collect()
    }

    /// Deadline for an attempt of `task_type` claimed at `now`
    pub fn deadline_for(&self, task_type: TaskType) -> Option<DateTime<Utc>> {
        self.executable
            .iter()
            .find(|(t, _)| *t == task_type)
            .and_then(|(_, max)| chrono::Duration::from_std(*max).ok())
            .map(|max| self.now + max)
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new `Pending` task together with its prerequisite edges.
    ///
    /// Every prerequisite must exist and belong to the same tenant.
    async fn insert_task(&self, task: &Task, depends_on: &[Uuid]) -> Result<()>;

    /// Add an edge between two existing tasks of one tenant.
    ///
    /// Rejects self-loops and cycles with `ValidationFailure`. The dependent must be
    /// `Pending`, or `Ready` when the prerequisite has already succeeded.
    async fn add_dependency(&self, edge: &TaskDependencyEdge) -> Result<()>;

    async fn get_task(&self, task_uuid: Uuid) -> Result<Option<Task>>;

    /// A tenant's tasks, newest first
    async fn list_tasks(&self, tenant_id: &str, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Edges where `task_uuid` is the dependent
    async fn dependencies_of(&self, task_uuid: Uuid) -> Result<Vec<TaskDependencyEdge>>;

    /// Move `Pending` tasks whose prerequisites all succeeded and whose `ready_at`
    /// has passed to `Ready`. Returns the promoted tasks.
    async fn promote_ready(&self, now: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Tenants with at least one claimable task at `now`, sorted
    async fn tenants_with_ready_work(&self, now: DateTime<Utc>) -> Result<Vec<String>>;

    /// Atomically claim the tenant's best candidate: `Pending | Ready`,
    /// `ready_at <= now`, all prerequisites `Succeeded`, an executable type, and
    /// the tenant below its cap. Ordered by `(priority desc, created_at asc)`.
    ///
    /// The claim increments `attempt`, resets `progress`, and stamps
    /// `started_at`, `claimed_by` and `deadline_at`.
    async fn claim_next(&self, request: &ClaimRequest) -> Result<Option<Task>>;

    /// Raise progress for the attempt; lower values are ignored
    async fn update_progress(&self, token: &ClaimToken, percent: u8) -> Result<bool>;

    /// Apply the outcome of a claimed attempt. `None` when the token is stale.
    async fn finish_attempt(
        &self,
        token: &ClaimToken,
        outcome: AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>>;

    /// Cancel a task that has not started, or flag a running one
    async fn request_cancel(&self, task_uuid: Uuid, now: DateTime<Utc>) -> Result<CancelOutcome>;

    async fn is_cancel_requested(&self, task_uuid: Uuid) -> Result<bool>;

    /// Operator failure of a `Pending | Ready` task
    async fn force_fail(
        &self,
        task_uuid: Uuid,
        failure: TaskFailure,
        now: DateTime<Utc>,
    ) -> Result<Task>;

    /// Cancel every transitive dependent of `task_uuid` that has not started;
    /// running dependents are flagged for cancellation instead. Returns tasks
    /// moved to `Cancelled`.
    async fn cancel_dependents(&self, task_uuid: Uuid, now: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Cancel any not-started task with an unsuccessful-terminal prerequisite
    async fn cancel_blocked(&self, now: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Running tasks whose `deadline_at + grace` is before `now`
    async fn find_expired(&self, now: DateTime<Utc>, grace: Duration) -> Result<Vec<Task>>;

    async fn running_count(&self, tenant_id: &str) -> Result<usize>;
}

/// Failure recorded on tasks cancelled because a prerequisite did not succeed
pub(crate) fn ancestor_failure(
    prerequisite: Uuid,
    attempt: u32,
    now: DateTime<Utc>,
) -> TaskFailure {
    TaskFailure {
        code: crate::error::ErrorKind::Cancelled.code().to_string(),
        message: format!("prerequisite {prerequisite} did not succeed"),
        details: Some(serde_json::json!({ "prerequisite": prerequisite })),
        attempt,
        occurred_at: now,
    }
}
