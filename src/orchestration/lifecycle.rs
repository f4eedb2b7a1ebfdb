//! # Task Lifecycle
//!
//! Side effects of every task transition, applied in one place so the scheduler,
//! the reaper and the public API cannot drift apart:
//!
//! - an audit entry correlated with the task
//! - a progress event (lifecycle, and `Failed` for failed attempts)
//! - lifecycle metrics and a structured log line
//! - cascading cancellation of dependents when a task ends unsuccessfully
//!
//! Also home of [`TaskLifecycle::complete_attempt`], which turns the outcome of an
//! executor run into the next persisted state through the retry engine.

use chrono::Utc;
use opentelemetry::KeyValue;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::backoff_calculator::RetryDecision;
use super::context::OrchestratorContext;
use crate::audit::AuditRecord;
use crate::constants::{resource_types, task_operations};
use crate::error::{ErrorKind, OrchestratorError, Result};
use crate::events::ProgressEventKind;
use crate::logging::log_task_operation;
use crate::metrics;
use crate::models::{AttemptOutcome, ClaimToken, Task, TaskFailure};

#[derive(Debug, Clone)]
pub struct TaskLifecycle {
    ctx: OrchestratorContext,
}

fn type_label(task: &Task) -> KeyValue {
    KeyValue::new("task_type", task.task_type.as_str())
}

fn snapshot(task: &Task) -> Value {
    json!({
        "status": task.status,
        "attempt": task.attempt,
        "ready_at": task.ready_at,
    })
}

impl TaskLifecycle {
    pub fn new(ctx: OrchestratorContext) -> Self {
        Self { ctx }
    }

    /// Audit record for a scheduler-driven transition, attributed to the task's actor
    fn record(&self, task: &Task, operation: &str) -> AuditRecord {
        AuditRecord::new(
            task.tenant_id.clone(),
            task.actor_user_id.clone(),
            operation,
            resource_types::TASK,
            task.task_uuid.to_string(),
        )
        .correlated_task(task.task_uuid)
    }

    fn announce(&self, task: &Task) {
        self.ctx.progress.publish(
            &task.tenant_id,
            task.task_uuid,
            task.attempt,
            ProgressEventKind::Lifecycle {
                status: task.status,
            },
        );
    }

    fn announce_failure(&self, task: &Task, failure: &TaskFailure, will_retry: bool) {
        self.ctx.progress.publish(
            &task.tenant_id,
            task.task_uuid,
            failure.attempt,
            ProgressEventKind::Failed {
                error: failure.clone(),
                will_retry,
            },
        );
    }

    pub async fn enqueued(&self, task: &Task) {
        self.ctx
            .audit
            .record(
                self.record(task, task_operations::ENQUEUE)
                    .new_value(json!({
                        "task_type": task.task_type,
                        "priority": task.priority,
                        "max_attempts": task.max_attempts,
                        "payload": task.payload,
                    }))
                    .pending(),
            )
            .await;
        self.announce(task);
        metrics::tasks_enqueued_total().add(1, &[type_label(task)]);
        log_task_operation(
            task_operations::ENQUEUE,
            task.task_uuid,
            &task.tenant_id,
            task.task_type.as_str(),
            task.status.as_str(),
            None,
        );
    }

    pub async fn promoted(&self, task: &Task) {
        self.ctx
            .audit
            .record(self.record(task, task_operations::READY).pending())
            .await;
        self.announce(task);
    }

    pub async fn claimed(&self, task: &Task) {
        self.ctx
            .audit
            .record(
                self.record(task, task_operations::CLAIM)
                    .new_value(json!({
                        "attempt": task.attempt,
                        "worker_id": task.claimed_by,
                        "deadline_at": task.deadline_at,
                    }))
                    .pending(),
            )
            .await;
        self.announce(task);
        metrics::tasks_claimed_total().add(1, &[type_label(task)]);
        log_task_operation(
            task_operations::CLAIM,
            task.task_uuid,
            &task.tenant_id,
            task.task_type.as_str(),
            task.status.as_str(),
            task.claimed_by.as_deref(),
        );
    }

    pub async fn succeeded(&self, task: &Task) {
        self.ctx
            .audit
            .record(
                self.record(task, task_operations::SUCCEED)
                    .new_value(json!({ "attempt": task.attempt, "result": task.result })),
            )
            .await;
        // Final progress value even if the executor never reported 100
        self.ctx.progress.publish(
            &task.tenant_id,
            task.task_uuid,
            task.attempt,
            ProgressEventKind::Progress {
                percent: 100,
                message: None,
            },
        );
        self.announce(task);
        metrics::tasks_succeeded_total().add(1, &[type_label(task)]);
        log_task_operation(
            task_operations::SUCCEED,
            task.task_uuid,
            &task.tenant_id,
            task.task_type.as_str(),
            task.status.as_str(),
            None,
        );
    }

    pub async fn retry_scheduled(&self, task: &Task, failure: &TaskFailure) {
        self.ctx
            .audit
            .record(
                self.record(task, task_operations::RETRY)
                    .new_value(snapshot(task))
                    .failed(failure.message.clone()),
            )
            .await;
        self.announce_failure(task, failure, true);
        self.announce(task);
        metrics::tasks_retried_total().add(
            1,
            &[type_label(task), KeyValue::new("error_code", failure.code.clone())],
        );
        log_task_operation(
            task_operations::RETRY,
            task.task_uuid,
            &task.tenant_id,
            task.task_type.as_str(),
            task.status.as_str(),
            Some(&failure.message),
        );
    }

    pub async fn dead_lettered(&self, task: &Task, failure: &TaskFailure) -> Result<()> {
        self.ctx
            .audit
            .record(
                self.record(task, task_operations::DEAD_LETTER)
                    .new_value(snapshot(task))
                    .failed(failure.message.clone()),
            )
            .await;
        self.announce_failure(task, failure, false);
        self.announce(task);
        metrics::tasks_dead_lettered_total().add(
            1,
            &[type_label(task), KeyValue::new("error_code", failure.code.clone())],
        );
        log_task_operation(
            task_operations::DEAD_LETTER,
            task.task_uuid,
            &task.tenant_id,
            task.task_type.as_str(),
            task.status.as_str(),
            Some(&failure.message),
        );
        self.cascade(task).await
    }

    /// A task reached `Cancelled`; `actor` is the caller for explicit cancels
    pub async fn cancelled(&self, task: &Task, actor: Option<&str>) -> Result<()> {
        let mut record = self
            .record(task, task_operations::CANCEL)
            .new_value(snapshot(task));
        if let Some(actor) = actor {
            record.actor_user_id = actor.to_string();
        }
        if let Some(reason) = &task.last_error {
            record.error_message = Some(reason.message.clone());
        }
        self.ctx.audit.record(record).await;
        self.announce(task);
        metrics::tasks_cancelled_total().add(1, &[type_label(task)]);
        log_task_operation(
            task_operations::CANCEL,
            task.task_uuid,
            &task.tenant_id,
            task.task_type.as_str(),
            task.status.as_str(),
            task.last_error.as_ref().map(|f| f.message.as_str()),
        );
        self.cascade(task).await
    }

    pub async fn cancel_requested(&self, task: &Task, actor: &str) {
        let mut record = self.record(task, task_operations::CANCEL_REQUESTED).pending();
        record.actor_user_id = actor.to_string();
        self.ctx.audit.record(record).await;
        info!(task_uuid = %task.task_uuid, "🛑 Cancellation requested for running task");
    }

    pub async fn force_failed(&self, task: &Task, actor: &str) -> Result<()> {
        let message = task
            .last_error
            .as_ref()
            .map(|f| f.message.clone())
            .unwrap_or_default();
        let mut record = self
            .record(task, task_operations::FAIL)
            .new_value(snapshot(task))
            .failed(message);
        record.actor_user_id = actor.to_string();
        self.ctx.audit.record(record).await;
        self.announce(task);
        log_task_operation(
            task_operations::FAIL,
            task.task_uuid,
            &task.tenant_id,
            task.task_type.as_str(),
            task.status.as_str(),
            Some(actor),
        );
        self.cascade(task).await
    }

    /// Cancel every not-started dependent of a task that ended unsuccessfully
    pub async fn cascade(&self, task: &Task) -> Result<()> {
        if !task.status.is_unsuccessful_terminal() {
            return Ok(());
        }
        let cancelled = self
            .ctx
            .store
            .cancel_dependents(task.task_uuid, Utc::now())
            .await?;
        for dependent in &cancelled {
            self.cancelled_by_ancestor(dependent).await;
        }
        Ok(())
    }

    /// Side effects for tasks the store cancelled because a prerequisite failed.
    /// The store cascade is already transitive, so this does not recurse.
    pub async fn cancelled_by_ancestor(&self, task: &Task) {
        let mut record = self
            .record(task, task_operations::CANCEL)
            .new_value(snapshot(task));
        record.error_message = task.last_error.as_ref().map(|f| f.message.clone());
        self.ctx.audit.record(record).await;
        self.announce(task);
        metrics::tasks_cancelled_total().add(1, &[type_label(task)]);
        log_task_operation(
            task_operations::CANCEL,
            task.task_uuid,
            &task.tenant_id,
            task.task_type.as_str(),
            task.status.as_str(),
            Some("prerequisite did not succeed"),
        );
    }

    /// Persist the outcome of an attempt and apply its side effects.
    ///
    /// Returns `None` when `token` no longer holds the claim; nothing is written then.
    pub async fn complete_attempt(
        &self,
        task: &Task,
        token: &ClaimToken,
        outcome: Result<Value>,
        cancel_observed: bool,
    ) -> Result<Option<Task>> {
        let now = Utc::now();
        let store = &self.ctx.store;

        let error = match outcome {
            Ok(result) => {
                let finished = store
                    .finish_attempt(token, AttemptOutcome::Succeeded { result }, now)
                    .await?;
                if let Some(done) = &finished {
                    self.succeeded(done).await;
                } else {
                    warn!(task_uuid = %token.task_uuid, attempt = token.attempt, "Discarding result of stale attempt");
                }
                self.ctx.wake.notify_one();
                return Ok(finished);
            }
            Err(error) => error,
        };

        let failure = TaskFailure::from_error(&error, token.attempt, now);
        let cancel = cancel_observed
            || error.kind == ErrorKind::Cancelled
            || store.is_cancel_requested(token.task_uuid).await.unwrap_or(false);

        let finished = if cancel {
            let finished = store
                .finish_attempt(
                    token,
                    AttemptOutcome::Cancelled {
                        failure: Some(failure),
                    },
                    now,
                )
                .await?;
            if let Some(done) = &finished {
                self.cancelled(done, None).await?;
            }
            finished
        } else {
            match self.ctx.retry.decide(task, &error, now) {
                RetryDecision::Retry { ready_at, .. } => {
                    let finished = store
                        .finish_attempt(
                            token,
                            AttemptOutcome::Retry {
                                failure: failure.clone(),
                                ready_at,
                            },
                            now,
                        )
                        .await?;
                    if let Some(done) = &finished {
                        self.retry_scheduled(done, &failure).await;
                    }
                    finished
                }
                RetryDecision::DeadLetter(reason) => {
                    let finished = store
                        .finish_attempt(
                            token,
                            AttemptOutcome::DeadLettered {
                                failure: failure.clone(),
                            },
                            now,
                        )
                        .await?;
                    if let Some(done) = &finished {
                        warn!(task_uuid = %done.task_uuid, ?reason, code = %failure.code, "☠️ Task dead-lettered");
                        self.dead_lettered(done, &failure).await?;
                    }
                    finished
                }
            }
        };

        if finished.is_none() {
            warn!(
                task_uuid = %token.task_uuid,
                attempt = token.attempt,
                error = %error,
                "Discarding failure of stale attempt"
            );
        }
        self.ctx.wake.notify_one();
        Ok(finished)
    }
}

/// Failure recorded when an operator force-fails a task
pub fn operator_failure(reason: &str, attempt: u32) -> TaskFailure {
    TaskFailure::from_error(
        &OrchestratorError::terminal(format!("failed by operator: {reason}")),
        attempt,
        Utc::now(),
    )
}
