//! # PostgreSQL Task Store
//!
//! [`TaskStore`] over `opsflow_tasks` and `opsflow_task_edges`, safe to share
//! between replicas.
//!
//! ## Claiming
//!
//! `claim_next` runs in one transaction:
//!
//! 1. `pg_try_advisory_xact_lock(hashtext(tenant_id))` serializes claims per tenant
//!    so the running-count check and the claim cannot interleave across replicas.
//!    A replica that loses the race skips the tenant for this round.
//! 2. The candidate row is selected `FOR UPDATE SKIP LOCKED`, so workers never block
//!    on rows another transaction is already transitioning.
//! 3. The row moves to `running` and the lock is released on commit. From then on
//!    the `running` status, not a held transaction, is the claim.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::task_store::{ancestor_failure, ClaimRequest, TaskStore};
use crate::constants::system;
use crate::error::{OrchestratorError, Result};
use crate::models::{
    AttemptOutcome, CancelOutcome, ClaimToken, Task, TaskDependencyEdge, TaskFailure, TaskFilter,
};
use crate::state_machine::{next_state, TaskEvent, TaskStatus};

const TASK_COLUMNS: &str = "task_uuid, tenant_id, actor_user_id, task_type, status, payload, \
     priority, attempt, max_attempts, backoff_policy, progress, result, last_error, \
     cancel_requested, claimed_by, created_at, ready_at, started_at, completed_at, deadline_at";

/// Prerequisites of `t` that have not succeeded
const UNSATISFIED_PREREQUISITES: &str = "EXISTS (SELECT 1 FROM opsflow_task_edges e \
     JOIN opsflow_tasks p ON p.task_uuid = e.depends_on_task_uuid \
     WHERE e.dependent_task_uuid = t.task_uuid AND p.status <> 'succeeded')";

#[derive(Debug, FromRow)]
struct TaskRow {
    task_uuid: Uuid,
    tenant_id: String,
    actor_user_id: String,
    task_type: String,
    status: String,
    payload: Value,
    priority: i32,
    attempt: i32,
    max_attempts: i32,
    backoff_policy: Value,
    progress: i16,
    result: Option<Value>,
    last_error: Option<Value>,
    cancel_requested: bool,
    claimed_by: Option<String>,
    created_at: DateTime<Utc>,
    ready_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    deadline_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = OrchestratorError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let corrupt = |field: &str, reason: String| {
            OrchestratorError::storage(format!("task {} has invalid {field}: {reason}", row.task_uuid))
        };
        Ok(Task {
            task_uuid: row.task_uuid,
            tenant_id: row.tenant_id.clone(),
            actor_user_id: row.actor_user_id.clone(),
            task_type: row.task_type.parse().map_err(|e: String| corrupt("task_type", e))?,
            status: row.status.parse().map_err(|e: String| corrupt("status", e))?,
            payload: row.payload.clone(),
            priority: row.priority,
            attempt: u32::try_from(row.attempt).map_err(|e| corrupt("attempt", e.to_string()))?,
            max_attempts: u32::try_from(row.max_attempts)
                .map_err(|e| corrupt("max_attempts", e.to_string()))?,
            backoff_policy: serde_json::from_value(row.backoff_policy.clone())
                .map_err(|e| corrupt("backoff_policy", e.to_string()))?,
            progress: u8::try_from(row.progress).map_err(|e| corrupt("progress", e.to_string()))?,
            result: row.result.clone(),
            last_error: row
                .last_error
                .clone()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| corrupt("last_error", e.to_string()))?,
            cancel_requested: row.cancel_requested,
            claimed_by: row.claimed_by.clone(),
            created_at: row.created_at,
            ready_at: row.ready_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            deadline_at: row.deadline_at,
        })
    }
}

fn to_tasks(rows: Vec<TaskRow>) -> Result<Vec<Task>> {
    rows.into_iter().map(Task::try_from).collect()
}

fn failure_json(failure: &TaskFailure) -> Result<Value> {
    serde_json::to_value(failure).map_err(|e| OrchestratorError::storage(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_task(
        tx: &mut Transaction<'_, Postgres>,
        task_uuid: Uuid,
    ) -> Result<Task> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM opsflow_tasks WHERE task_uuid = $1 FOR UPDATE"
        ))
        .bind(task_uuid)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| OrchestratorError::not_found(format!("task {task_uuid}")))?;
        Task::try_from(row)
    }

    async fn cancel_not_started(
        tx: &mut Transaction<'_, Postgres>,
        task_uuid: Uuid,
        failure: Option<&TaskFailure>,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let last_error = failure.map(failure_json).transpose()?;
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE opsflow_tasks \
             SET status = 'cancelled', cancel_requested = TRUE, completed_at = $2, \
                 last_error = COALESCE($3, last_error) \
             WHERE task_uuid = $1 AND status IN ('pending', 'ready') \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_uuid)
        .bind(now)
        .bind(last_error)
        .fetch_one(&mut **tx)
        .await?;
        Task::try_from(row)
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    #[instrument(skip(self, task), fields(task_uuid = %task.task_uuid, tenant_id = %task.tenant_id))]
    async fn insert_task(&self, task: &Task, depends_on: &[Uuid]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if !depends_on.is_empty() {
            let tenants: Vec<(Uuid, String)> = sqlx::query_as(
                "SELECT task_uuid, tenant_id FROM opsflow_tasks WHERE task_uuid = ANY($1)",
            )
            .bind(depends_on)
            .fetch_all(&mut *tx)
            .await?;
            for prerequisite in depends_on {
                match tenants.iter().find(|(id, _)| id == prerequisite) {
                    None => {
                        return Err(OrchestratorError::not_found(format!("task {prerequisite}")))
                    }
                    Some((_, tenant)) if *tenant != task.tenant_id => {
                        return Err(OrchestratorError::validation(format!(
                            "prerequisite {prerequisite} belongs to another tenant"
                        )))
                    }
                    Some(_) => {}
                }
            }
        }

        sqlx::query(
            r#"
            INSERT INTO opsflow_tasks (
                task_uuid, tenant_id, actor_user_id, task_type, status, payload, priority,
                attempt, max_attempts, backoff_policy, progress, cancel_requested,
                created_at, ready_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(task.task_uuid)
        .bind(&task.tenant_id)
        .bind(&task.actor_user_id)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(&task.payload)
        .bind(task.priority)
        .bind(task.attempt as i32)
        .bind(task.max_attempts as i32)
        .bind(serde_json::to_value(task.backoff_policy)?)
        .bind(task.progress as i16)
        .bind(task.cancel_requested)
        .bind(task.created_at)
        .bind(task.ready_at)
        .execute(&mut *tx)
        .await?;

        for prerequisite in depends_on {
            sqlx::query(
                "INSERT INTO opsflow_task_edges \
                 (dependent_task_uuid, depends_on_task_uuid, tenant_id, created_at) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
            )
            .bind(task.task_uuid)
            .bind(prerequisite)
            .bind(&task.tenant_id)
            .bind(task.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, edge), fields(dependent = %edge.dependent_task_uuid, depends_on = %edge.depends_on_task_uuid))]
    async fn add_dependency(&self, edge: &TaskDependencyEdge) -> Result<()> {
        if edge.is_self_loop() {
            return Err(OrchestratorError::validation("a task cannot depend on itself"));
        }
        let mut tx = self.pool.begin().await?;

        // Serialize graph edits per tenant so two concurrent edges cannot close a cycle
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('opsflow_edges:' || $1))")
            .bind(&edge.tenant_id)
            .execute(&mut *tx)
            .await?;

        let dependent = Self::lock_task(&mut tx, edge.dependent_task_uuid).await?;
        let prerequisite = Self::lock_task(&mut tx, edge.depends_on_task_uuid).await?;
        if dependent.tenant_id != prerequisite.tenant_id || dependent.tenant_id != edge.tenant_id {
            return Err(OrchestratorError::validation(
                "dependencies may only connect tasks of the same tenant",
            ));
        }
        let accepts = match dependent.status {
            TaskStatus::Pending => true,
            TaskStatus::Ready => prerequisite.status.satisfies_dependencies(),
            _ => false,
        };
        if !accepts {
            return Err(OrchestratorError::validation(format!(
                "task {} is {} and can no longer gain prerequisites",
                dependent.task_uuid, dependent.status
            )));
        }

        let (creates_cycle,): (bool,) = sqlx::query_as(
            r#"
            WITH RECURSIVE ancestors(task_uuid) AS (
                SELECT depends_on_task_uuid FROM opsflow_task_edges WHERE dependent_task_uuid = $1
                UNION
                SELECT e.depends_on_task_uuid
                FROM opsflow_task_edges e
                JOIN ancestors a ON e.dependent_task_uuid = a.task_uuid
            )
            SELECT EXISTS (SELECT 1 FROM ancestors WHERE task_uuid = $2)
            "#,
        )
        .bind(edge.depends_on_task_uuid)
        .bind(edge.dependent_task_uuid)
        .fetch_one(&mut *tx)
        .await?;
        if creates_cycle {
            return Err(OrchestratorError::validation(format!(
                "dependency {} -> {} would create a cycle",
                edge.dependent_task_uuid, edge.depends_on_task_uuid
            )));
        }

        sqlx::query(
            "INSERT INTO opsflow_task_edges \
             (dependent_task_uuid, depends_on_task_uuid, tenant_id, created_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
        )
        .bind(edge.dependent_task_uuid)
        .bind(edge.depends_on_task_uuid)
        .bind(&edge.tenant_id)
        .bind(edge.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_task(&self, task_uuid: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM opsflow_tasks WHERE task_uuid = $1"
        ))
        .bind(task_uuid)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Task::try_from).transpose()
    }

    async fn list_tasks(&self, tenant_id: &str, filter: &TaskFilter) -> Result<Vec<Task>> {
        let limit = filter
            .limit
            .unwrap_or(system::MAX_LIST_LIMIT)
            .min(system::MAX_LIST_LIMIT);
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM opsflow_tasks \
             WHERE tenant_id = $1 \
               AND ($2::TEXT IS NULL OR status = $2) \
               AND ($3::TEXT IS NULL OR task_type = $3) \
             ORDER BY created_at DESC, task_uuid DESC \
             LIMIT $4"
        ))
        .bind(tenant_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.task_type.map(|t| t.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        to_tasks(rows)
    }

    async fn dependencies_of(&self, task_uuid: Uuid) -> Result<Vec<TaskDependencyEdge>> {
        let edges = sqlx::query_as::<_, TaskDependencyEdge>(
            "SELECT dependent_task_uuid, depends_on_task_uuid, tenant_id, created_at \
             FROM opsflow_task_edges WHERE dependent_task_uuid = $1 \
             ORDER BY created_at ASC",
        )
        .bind(task_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(edges)
    }

    #[instrument(skip(self))]
    async fn promote_ready(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE opsflow_tasks t SET status = 'ready' \
             WHERE t.status = 'pending' AND t.ready_at <= $1 AND NOT t.cancel_requested \
               AND t.attempt < t.max_attempts AND NOT {UNSATISFIED_PREREQUISITES} \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        to_tasks(rows)
    }

    async fn tenants_with_ready_work(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let tenants: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT DISTINCT t.tenant_id FROM opsflow_tasks t \
             WHERE t.status IN ('pending', 'ready') AND t.ready_at <= $1 \
               AND NOT t.cancel_requested AND t.attempt < t.max_attempts \
               AND NOT {UNSATISFIED_PREREQUISITES} \
             ORDER BY t.tenant_id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(tenants.into_iter().map(|(t,)| t).collect())
    }

    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id, worker_id = %request.worker_id))]
    async fn claim_next(&self, request: &ClaimRequest) -> Result<Option<Task>> {
        let mut tx = self.pool.begin().await?;

        let (locked,): (bool,) =
            sqlx::query_as("SELECT pg_try_advisory_xact_lock(hashtext($1))")
                .bind(&request.tenant_id)
                .fetch_one(&mut *tx)
                .await?;
        if !locked {
            debug!("Another replica is claiming for this tenant");
            return Ok(None);
        }

        let (running,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM opsflow_tasks WHERE tenant_id = $1 AND status = 'running'",
        )
        .bind(&request.tenant_id)
        .fetch_one(&mut *tx)
        .await?;
        if running as usize >= request.tenant_cap {
            return Ok(None);
        }

        let types: Vec<String> = request
            .task_types()
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        let candidate = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM opsflow_tasks t \
             WHERE t.tenant_id = $1 AND t.status IN ('pending', 'ready') \
               AND t.ready_at <= $2 AND NOT t.cancel_requested \
               AND t.attempt < t.max_attempts AND t.task_type = ANY($3) \
               AND NOT {UNSATISFIED_PREREQUISITES} \
             ORDER BY t.priority DESC, t.created_at ASC \
             LIMIT 1 \
             FOR UPDATE OF t SKIP LOCKED"
        ))
        .bind(&request.tenant_id)
        .bind(request.now)
        .bind(&types)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            return Ok(None);
        };
        let candidate = Task::try_from(candidate)?;
        next_state(candidate.status, TaskEvent::Claim)?;

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE opsflow_tasks \
             SET status = 'running', attempt = attempt + 1, progress = 0, result = NULL, \
                 started_at = $2, claimed_by = $3, deadline_at = $4 \
             WHERE task_uuid = $1 \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(candidate.task_uuid)
        .bind(request.now)
        .bind(&request.worker_id)
        .bind(request.deadline_for(candidate.task_type))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Task::try_from(row).map(Some)
    }

    async fn update_progress(&self, token: &ClaimToken, percent: u8) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE opsflow_tasks SET progress = GREATEST(progress, $4) \
             WHERE task_uuid = $1 AND status = 'running' AND attempt = $2 AND claimed_by = $3",
        )
        .bind(token.task_uuid)
        .bind(token.attempt as i32)
        .bind(&token.worker_id)
        .bind(percent.min(100) as i16)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    #[instrument(skip(self, outcome), fields(task_uuid = %token.task_uuid, attempt = token.attempt))]
    async fn finish_attempt(
        &self,
        token: &ClaimToken,
        outcome: AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let target = outcome.target_status();
        let (result, last_error, ready_at, completed_at, progress_done) = match &outcome {
            AttemptOutcome::Succeeded { result } => (Some(result.clone()), None, None, Some(now), true),
            AttemptOutcome::Retry { failure, ready_at } => {
                (None, Some(failure_json(failure)?), Some(*ready_at), None, false)
            }
            AttemptOutcome::DeadLettered { failure } => {
                (None, Some(failure_json(failure)?), None, Some(now), false)
            }
            AttemptOutcome::Cancelled { failure } => (
                None,
                failure.as_ref().map(failure_json).transpose()?,
                None,
                Some(now),
                false,
            ),
        };

        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE opsflow_tasks \
             SET status = $4, \
                 result = COALESCE($5, result), \
                 last_error = COALESCE($6, last_error), \
                 ready_at = COALESCE($7, ready_at), \
                 completed_at = $8, \
                 progress = CASE WHEN $9 THEN 100 ELSE progress END, \
                 claimed_by = CASE WHEN $4 = 'pending' THEN NULL ELSE claimed_by END, \
                 deadline_at = NULL \
             WHERE task_uuid = $1 AND status = 'running' AND attempt = $2 AND claimed_by = $3 \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(token.task_uuid)
        .bind(token.attempt as i32)
        .bind(&token.worker_id)
        .bind(target.as_str())
        .bind(result)
        .bind(last_error)
        .bind(ready_at)
        .bind(completed_at)
        .bind(progress_done)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Task::try_from).transpose()
    }

    async fn request_cancel(&self, task_uuid: Uuid, now: DateTime<Utc>) -> Result<CancelOutcome> {
        let mut tx = self.pool.begin().await?;
        let task = Self::lock_task(&mut tx, task_uuid).await?;
        let outcome = match task.status {
            TaskStatus::Pending | TaskStatus::Ready => {
                next_state(task.status, TaskEvent::Cancel)?;
                CancelOutcome::Cancelled(Self::cancel_not_started(&mut tx, task_uuid, None, now).await?)
            }
            TaskStatus::Running => {
                let row = sqlx::query_as::<_, TaskRow>(&format!(
                    "UPDATE opsflow_tasks SET cancel_requested = TRUE WHERE task_uuid = $1 \
                     RETURNING {TASK_COLUMNS}"
                ))
                .bind(task_uuid)
                .fetch_one(&mut *tx)
                .await?;
                CancelOutcome::Requested(Task::try_from(row)?)
            }
            _ => CancelOutcome::AlreadyTerminal(task),
        };
        tx.commit().await?;
        Ok(outcome)
    }

    async fn is_cancel_requested(&self, task_uuid: Uuid) -> Result<bool> {
        let flag: Option<(bool,)> =
            sqlx::query_as("SELECT cancel_requested FROM opsflow_tasks WHERE task_uuid = $1")
                .bind(task_uuid)
                .fetch_optional(&self.pool)
                .await?;
        flag.map(|(f,)| f)
            .ok_or_else(|| OrchestratorError::not_found(format!("task {task_uuid}")))
    }

    async fn force_fail(
        &self,
        task_uuid: Uuid,
        failure: TaskFailure,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let mut tx = self.pool.begin().await?;
        let task = Self::lock_task(&mut tx, task_uuid).await?;
        next_state(task.status, TaskEvent::ForceFail)?;
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE opsflow_tasks SET status = 'failed', last_error = $2, completed_at = $3 \
             WHERE task_uuid = $1 RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_uuid)
        .bind(failure_json(&failure)?)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Task::try_from(row)
    }

    #[instrument(skip(self))]
    async fn cancel_dependents(&self, task_uuid: Uuid, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut tx = self.pool.begin().await?;
        let mut cancelled = Vec::new();
        let mut queue = vec![task_uuid];

        while let Some(prerequisite) = queue.pop() {
            let rows = sqlx::query_as::<_, TaskRow>(&format!(
                "SELECT {TASK_COLUMNS} FROM opsflow_tasks t \
                 JOIN opsflow_task_edges e ON e.dependent_task_uuid = t.task_uuid \
                 WHERE e.depends_on_task_uuid = $1 AND t.status IN ('pending', 'ready', 'running') \
                 FOR UPDATE OF t"
            ))
            .bind(prerequisite)
            .fetch_all(&mut *tx)
            .await?;

            for dependent in to_tasks(rows)? {
                if dependent.status == TaskStatus::Running {
                    sqlx::query("UPDATE opsflow_tasks SET cancel_requested = TRUE WHERE task_uuid = $1")
                        .bind(dependent.task_uuid)
                        .execute(&mut *tx)
                        .await?;
                    continue;
                }
                let failure = ancestor_failure(prerequisite, dependent.attempt, now);
                let task =
                    Self::cancel_not_started(&mut tx, dependent.task_uuid, Some(&failure), now).await?;
                queue.push(task.task_uuid);
                cancelled.push(task);
            }
        }

        tx.commit().await?;
        Ok(cancelled)
    }

    async fn cancel_blocked(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut tx = self.pool.begin().await?;
        let mut cancelled = Vec::new();
        loop {
            let blocked: Vec<(Uuid, Uuid, i32)> = sqlx::query_as(
                "SELECT DISTINCT ON (t.task_uuid) t.task_uuid, e.depends_on_task_uuid, t.attempt \
                 FROM opsflow_tasks t \
                 JOIN opsflow_task_edges e ON e.dependent_task_uuid = t.task_uuid \
                 JOIN opsflow_tasks p ON p.task_uuid = e.depends_on_task_uuid \
                 WHERE t.status IN ('pending', 'ready') \
                   AND p.status IN ('failed', 'dead_lettered', 'cancelled') \
                 ORDER BY t.task_uuid",
            )
            .fetch_all(&mut *tx)
            .await?;
            if blocked.is_empty() {
                break;
            }
            for (task_uuid, prerequisite, attempt) in blocked {
                let failure = ancestor_failure(prerequisite, attempt.max(0) as u32, now);
                cancelled.push(Self::cancel_not_started(&mut tx, task_uuid, Some(&failure), now).await?);
            }
        }
        tx.commit().await?;
        Ok(cancelled)
    }

    async fn find_expired(&self, now: DateTime<Utc>, grace: Duration) -> Result<Vec<Task>> {
        let cutoff = now - chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::zero());
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM opsflow_tasks \
             WHERE status = 'running' AND deadline_at < $1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        to_tasks(rows)
    }

    async fn running_count(&self, tenant_id: &str) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM opsflow_tasks WHERE tenant_id = $1 AND status = 'running'",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as usize)
    }
}
