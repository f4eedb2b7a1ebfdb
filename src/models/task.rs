use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{BackoffPolicy, TaskType};
use crate::error::{ErrorKind, OrchestratorError};
use crate::state_machine::TaskStatus;

/// A durable unit of asynchronous orchestrator work.
///
/// Maps to the `opsflow_tasks` table. Tasks are never deleted; terminal tasks are kept
/// for history and audit replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_uuid: Uuid,
    pub tenant_id: String,
    /// User that enqueued the task; scheduler-driven audit entries are attributed to it
    pub actor_user_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Opaque executor input
    pub payload: Value,
    /// Higher runs first
    pub priority: i32,
    /// Number of attempts started so far
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff_policy: BackoffPolicy,
    /// 0-100, monotonic within an attempt, reset when a new attempt starts
    pub progress: u8,
    /// Opaque executor output on success
    pub result: Option<Value>,
    pub last_error: Option<TaskFailure>,
    /// Set when a cancel is requested while the task is running
    pub cancel_requested: bool,
    /// Worker holding the current claim
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Earliest time the task may be claimed
    pub ready_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Claim time plus the executor's maximum duration
    pub deadline_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Token identifying the current attempt's claim, if the task is running
    pub fn claim_token(&self) -> Option<ClaimToken> {
        if self.status != TaskStatus::Running {
            return None;
        }
        Some(ClaimToken {
            task_uuid: self.task_uuid,
            attempt: self.attempt,
            worker_id: self.claimed_by.clone().unwrap_or_default(),
        })
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Input for creating a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub tenant_id: String,
    pub actor_user_id: String,
    pub task_type: TaskType,
    pub payload: Value,
    pub priority: i32,
    pub max_attempts: u32,
    pub backoff_policy: BackoffPolicy,
}

impl NewTask {
    /// Materialize the task in `Pending` at `now`
    pub fn into_task(self, now: DateTime<Utc>) -> Task {
        Task {
            task_uuid: Uuid::now_v7(),
            tenant_id: self.tenant_id,
            actor_user_id: self.actor_user_id,
            task_type: self.task_type,
            status: TaskStatus::Pending,
            payload: self.payload,
            priority: self.priority,
            attempt: 0,
            max_attempts: self.max_attempts,
            backoff_policy: self.backoff_policy,
            progress: 0,
            result: None,
            last_error: None,
            cancel_requested: false,
            claimed_by: None,
            created_at: now,
            ready_at: now,
            started_at: None,
            completed_at: None,
            deadline_at: None,
        }
    }
}

/// Identifies one claimed attempt. Every post-claim write is conditional on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimToken {
    pub task_uuid: Uuid,
    pub attempt: u32,
    pub worker_id: String,
}

/// Structured description of the last failure, stored as JSON on the task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

impl TaskFailure {
    pub fn from_error(error: &OrchestratorError, attempt: u32, occurred_at: DateTime<Utc>) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.message.clone(),
            details: error.details.clone(),
            attempt,
            occurred_at,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        ErrorKind::from_code(&self.code)
    }
}

/// How a claimed attempt ended; applied by `TaskStore::finish_attempt`
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded { result: Value },
    Retry { failure: TaskFailure, ready_at: DateTime<Utc> },
    DeadLettered { failure: TaskFailure },
    Cancelled { failure: Option<TaskFailure> },
}

impl AttemptOutcome {
    pub fn target_status(&self) -> TaskStatus {
        match self {
            Self::Succeeded { .. } => TaskStatus::Succeeded,
            Self::Retry { .. } => TaskStatus::Pending,
            Self::DeadLettered { .. } => TaskStatus::DeadLettered,
            Self::Cancelled { .. } => TaskStatus::Cancelled,
        }
    }
}

/// Result of a cancel request against the store
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The task had not started and is now `Cancelled`
    Cancelled(Task),
    /// The task is running; its worker will observe the flag
    Requested(Task),
    /// Nothing to do
    AlreadyTerminal(Task),
}

/// Filter for listing a tenant's tasks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub limit: Option<usize>,
}
