//! Shared fixtures for orchestrator integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use opsflow_core::access::{AccessContext, Role};
use opsflow_core::audit::{AuditLogger, InMemoryAuditRepository};
use opsflow_core::collaborators::{
    Collaborators, InMemoryDeploymentSync, InMemoryObjectStorage, InMemorySourceControl,
};
use opsflow_core::config::OrchestratorConfig;
use opsflow_core::database::{InMemoryTaskStore, TaskStore};
use opsflow_core::error::{OrchestratorError, Result};
use opsflow_core::executors::default_registry;
use opsflow_core::models::{AuditLogEntry, Task, TaskType};
use opsflow_core::orchestration::{
    ExecutionContext, ExecutorRegistry, Orchestrator, OrchestratorContext, ProgressHandle,
    TaskExecutor,
};

pub const TENANT: &str = "acme";

pub fn admin() -> AccessContext {
    AccessContext::new("ops-admin", TENANT, Role::Admin)
}

pub fn operator() -> AccessContext {
    AccessContext::new("operator", TENANT, Role::ReadWrite)
}

pub fn viewer() -> AccessContext {
    AccessContext::new("viewer", TENANT, Role::User)
}

/// Millisecond-scale scheduling and backoff so retries finish quickly
pub fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.scheduler.poll_interval_ms = 10;
    config.scheduler.cancel_poll_interval_ms = 10;
    config.scheduler.shutdown_timeout_secs = 5;
    config.backoff.base_ms = 5;
    config.backoff.multiplier = 2.0;
    config.backoff.jitter_ms = 0;
    config.backoff.cap_ms = 50;
    config
}

pub struct TestOrchestrator {
    pub orchestrator: Orchestrator,
    pub audit: Arc<InMemoryAuditRepository>,
    pub store: Arc<InMemoryTaskStore>,
    pub deployment: Arc<InMemoryDeploymentSync>,
    pub source_control: Arc<InMemorySourceControl>,
    pub storage: Arc<InMemoryObjectStorage>,
}

impl TestOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_executors(config, |registry| registry)
    }

    /// Build with the default executors, letting the test replace some
    pub fn with_executors(
        config: OrchestratorConfig,
        customize: impl FnOnce(ExecutorRegistry) -> ExecutorRegistry,
    ) -> Self {
        let deployment = Arc::new(
            InMemoryDeploymentSync::new()
                .with_application("billing", "payments")
                .with_application("search", "discovery"),
        );
        let source_control = Arc::new(
            InMemorySourceControl::new()
                .with_repository("infra", "main")
                .with_file("infra", "main", "apps/billing/values.yaml", "replicas: 1\n"),
        );
        let storage = Arc::new(InMemoryObjectStorage::new().with_objects(["exports/a.csv"]));
        let collaborators = Collaborators::new()
            .with_deployment(deployment.clone())
            .with_source_control(source_control.clone())
            .with_object_storage(storage.clone());

        let audit = Arc::new(InMemoryAuditRepository::new());
        let store = Arc::new(InMemoryTaskStore::new());
        let registry = customize(default_registry(&config.executors));
        let ctx = OrchestratorContext::new(
            config,
            store.clone(),
            Arc::new(AuditLogger::new(audit.clone())),
            collaborators,
        );

        Self {
            orchestrator: Orchestrator::new(ctx, registry),
            audit,
            store,
            deployment,
            source_control,
            storage,
        }
    }

    /// Poll until the task satisfies `done`, failing the test after five seconds
    pub async fn wait_for(&self, task_uuid: Uuid, done: impl Fn(&Task) -> bool) -> Task {
        let poll = async {
            loop {
                let task = self
                    .store
                    .get_task(task_uuid)
                    .await
                    .expect("store readable")
                    .expect("task exists");
                if done(&task) {
                    return task;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), poll)
            .await
            .expect("task did not reach the expected state in time")
    }

    pub async fn wait_terminal(&self, task_uuid: Uuid) -> Task {
        self.wait_for(task_uuid, |t| t.is_terminal()).await
    }

    /// Wait until `operation` is in the task's trail. Lifecycle entries land just
    /// after the store transition, so a terminal status alone does not imply them.
    pub async fn wait_audited(&self, task_uuid: Uuid, operation: &str) -> Vec<AuditLogEntry> {
        let poll = async {
            loop {
                let mut trail: Vec<AuditLogEntry> = self
                    .audit
                    .all()
                    .into_iter()
                    .filter(|e| e.correlated_task_id == Some(task_uuid))
                    .collect();
                trail.sort_by_key(|e| e.created_at);
                if trail.iter().any(|e| e.operation == operation) {
                    return trail;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), poll)
            .await
            .expect("audit entry was not recorded in time")
    }
}

pub fn deploy_sync_payload(application: &str) -> Value {
    json!({ "application": application })
}

pub fn bulk_update_payload() -> Value {
    json!({
        "repo": "infra",
        "branch": "ops/raise-replicas",
        "commit_message": "Raise replicas",
        "files": [{ "path": "apps/billing/values.yaml", "content": "replicas: 3\n" }],
    })
}

/// Runs until cancelled, reporting progress along the way
pub struct UntilCancelled(pub TaskType);

#[async_trait]
impl TaskExecutor for UntilCancelled {
    fn task_type(&self) -> TaskType {
        self.0
    }

    fn validate_payload(&self, _payload: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _ctx: &ExecutionContext, progress: &ProgressHandle) -> Result<Value> {
        progress.report(25, Some("working")).await?;
        progress.cancelled().await;
        Err(OrchestratorError::cancelled("stopped on request"))
    }
}

/// Never finishes on its own
pub struct Hang(pub TaskType);

#[async_trait]
impl TaskExecutor for Hang {
    fn task_type(&self) -> TaskType {
        self.0
    }

    fn validate_payload(&self, _payload: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _ctx: &ExecutionContext, _progress: &ProgressHandle) -> Result<Value> {
        std::future::pending::<()>().await;
        Ok(Value::Null)
    }
}
