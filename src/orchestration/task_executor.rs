//! # Task Executors
//!
//! One [`TaskExecutor`] per [`TaskType`]. The scheduler hands each claimed attempt
//! to the executor registered for its type, together with an
//! [`ExecutionContext`] and a [`ProgressHandle`].
//!
//! Executors must be safe to re-attempt: a timed-out or reaped attempt may have
//! partially applied its effects, so every external write is check-then-act or
//! idempotent.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::progress_handle::ProgressHandle;
use crate::audit::{AuditLogger, AuditRecord};
use crate::collaborators::Collaborators;
use crate::config::ExecutorsConfig;
use crate::error::{OrchestratorError, Result};
use crate::models::{Task, TaskType};

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn task_type(&self) -> TaskType;

    /// Reject malformed payloads at enqueue time, before any task exists
    fn validate_payload(&self, payload: &Value) -> Result<()>;

    /// Run one attempt. The returned value becomes the task's `result`.
    async fn execute(&self, ctx: &ExecutionContext, progress: &ProgressHandle) -> Result<Value>;
}

/// Decode a payload into an executor's typed input
pub fn parse_payload<T: DeserializeOwned>(payload: &Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| OrchestratorError::validation(format!("invalid payload: {e}")))
}

/// What an executor sees of the task it is running
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    task: Task,
    collaborators: Collaborators,
    audit: Arc<AuditLogger>,
}

impl ExecutionContext {
    pub fn new(task: Task, collaborators: Collaborators, audit: Arc<AuditLogger>) -> Self {
        Self {
            task,
            collaborators,
            audit,
        }
    }

    /// Task snapshot taken at claim time
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        parse_payload(&self.task.payload)
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Audit record attributed to the task's actor and correlated with the task
    pub fn audit_record(
        &self,
        operation: &str,
        resource_type: &str,
        resource_id: impl Into<String>,
    ) -> AuditRecord {
        AuditRecord::new(
            self.task.tenant_id.clone(),
            self.task.actor_user_id.clone(),
            operation,
            resource_type,
            resource_id,
        )
        .correlated_task(self.task.task_uuid)
    }

    pub async fn audit(&self, record: AuditRecord) {
        self.audit.record(record).await;
    }
}

/// Executors known to this replica, with each type's maximum attempt duration
#[derive(Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskType, Arc<dyn TaskExecutor>>,
    limits: ExecutorsConfig,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new(limits: ExecutorsConfig) -> Self {
        Self {
            executors: HashMap::new(),
            limits,
        }
    }

    /// Register an executor, replacing any previous one for the same type
    pub fn register(&mut self, executor: Arc<dyn TaskExecutor>) -> &mut Self {
        self.executors.insert(executor.task_type(), executor);
        self
    }

    pub fn with(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.register(executor);
        self
    }

    pub fn get(&self, task_type: TaskType) -> Option<&Arc<dyn TaskExecutor>> {
        self.executors.get(&task_type)
    }

    pub fn require(&self, task_type: TaskType) -> Result<&Arc<dyn TaskExecutor>> {
        self.get(task_type).ok_or_else(|| {
            OrchestratorError::validation(format!("no executor registered for {task_type}"))
        })
    }

    pub fn max_duration(&self, task_type: TaskType) -> Duration {
        self.limits.max_duration(task_type)
    }

    /// Sorted for stable claim requests
    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<_> = self.executors.keys().copied().collect();
        types.sort();
        types
    }

    /// `(type, max duration)` pairs for claim requests
    pub fn executable(&self) -> Vec<(TaskType, Duration)> {
        self.task_types()
            .into_iter()
            .map(|t| (t, self.max_duration(t)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(TaskType);

    #[async_trait]
    impl TaskExecutor for Echo {
        fn task_type(&self) -> TaskType {
            self.0
        }

        fn validate_payload(&self, _payload: &Value) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, ctx: &ExecutionContext, _progress: &ProgressHandle) -> Result<Value> {
            Ok(ctx.task().payload.clone())
        }
    }

    #[test]
    fn test_registry_reports_executable_types() {
        let registry = ExecutorRegistry::new(ExecutorsConfig::default())
            .with(Arc::new(Echo(TaskType::PrWorkflow)))
            .with(Arc::new(Echo(TaskType::DeploySync)));

        assert_eq!(registry.task_types(), vec![TaskType::DeploySync, TaskType::PrWorkflow]);
        assert_eq!(
            registry.executable()[0],
            (TaskType::DeploySync, Duration::from_secs(300))
        );
        assert!(registry.get(TaskType::BulkUpdate).is_none());
        assert_eq!(
            registry.require(TaskType::BulkUpdate).err().unwrap().code(),
            "VALIDATION_FAILED"
        );
    }
}
