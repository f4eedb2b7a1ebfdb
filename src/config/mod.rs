//! # Orchestrator Configuration
//!
//! Layered configuration for the orchestrator. Values come from, in increasing
//! precedence:
//!
//! 1. built-in defaults
//! 2. `config/opsflow.toml`
//! 3. `config/opsflow.<env>.toml`, where `<env>` is `OPSFLOW_ENV` (default `development`)
//! 4. `OPSFLOW__SECTION__KEY` environment variables
//!
//! ```rust,no_run
//! use opsflow_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let pool_size = manager.config().scheduler.worker_pool_size;
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::constants::system;
use crate::error::{OrchestratorError, Result};
use crate::logging::LoggingConfig;
use crate::models::{BackoffPolicy, TaskType};
use crate::rate_limit::RateLimitConfig;

pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub backoff: BackoffConfig,
    pub rate_limit: RateLimitConfig,
    pub progress: ProgressConfig,
    pub executors: ExecutorsConfig,
    pub logging: LoggingConfig,
}

impl OrchestratorConfig {
    /// Validate configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections", "pool size must be greater than 0"));
        }
        if self.scheduler.worker_pool_size == 0 {
            return Err(invalid("scheduler.worker_pool_size", "worker pool must hold at least one worker"));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(invalid("scheduler.poll_interval_ms", "poll interval must be greater than 0"));
        }
        if self.scheduler.default_tenant_concurrency == 0 {
            return Err(invalid(
                "scheduler.default_tenant_concurrency",
                "tenant concurrency cap must be at least 1",
            ));
        }
        if let Some((tenant, _)) = self.scheduler.tenant_concurrency.iter().find(|(_, cap)| **cap == 0) {
            return Err(invalid(
                &format!("scheduler.tenant_concurrency.{tenant}"),
                "tenant concurrency cap must be at least 1",
            ));
        }
        if self.backoff.max_attempts == 0 {
            return Err(invalid("backoff.max_attempts", "at least one attempt is required"));
        }
        self.backoff
            .default_policy()
            .validate()
            .map_err(|e| invalid("backoff", &e.message))?;
        self.rate_limit.validate()?;
        if self.progress.channel_capacity == 0 {
            return Err(invalid("progress.channel_capacity", "channel capacity must be greater than 0"));
        }
        for task_type in TaskType::ALL {
            if self.executors.max_duration(task_type).is_zero() {
                return Err(invalid(
                    &format!("executors.{task_type}_max_duration_secs"),
                    "max duration must be greater than 0",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> OrchestratorError {
    OrchestratorError::configuration(format!("invalid value for '{field}': {reason}"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Apply pending migrations at worker startup
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/opsflow_development".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 5,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Scheduler loop, concurrency and deadline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Identifies this replica in claims; a random id is generated when unset
    pub worker_id: Option<String>,
    pub worker_pool_size: usize,
    pub poll_interval_ms: u64,
    pub default_tenant_concurrency: usize,
    /// Per-tenant overrides of `default_tenant_concurrency`
    pub tenant_concurrency: HashMap<String, usize>,
    pub reaper_interval_ms: u64,
    pub deadline_grace_secs: u64,
    pub cancel_poll_interval_ms: u64,
    /// How long `shutdown` waits for in-flight attempts
    pub shutdown_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            worker_pool_size: system::DEFAULT_WORKER_POOL_SIZE,
            poll_interval_ms: 500,
            default_tenant_concurrency: system::DEFAULT_TENANT_CONCURRENCY,
            tenant_concurrency: HashMap::new(),
            reaper_interval_ms: 5_000,
            deadline_grace_secs: 30,
            cancel_poll_interval_ms: 1_000,
            shutdown_timeout_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn deadline_grace(&self) -> Duration {
        Duration::from_secs(self.deadline_grace_secs)
    }

    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Concurrency cap for a tenant
    pub fn tenant_cap(&self, tenant_id: &str) -> usize {
        self.tenant_concurrency
            .get(tenant_id)
            .copied()
            .unwrap_or(self.default_tenant_concurrency)
    }
}

/// Default retry policy applied when a task does not carry its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            base_ms: policy.base_ms,
            multiplier: policy.multiplier,
            jitter_ms: policy.jitter_ms,
            cap_ms: policy.cap_ms,
            max_attempts: system::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffConfig {
    pub fn default_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_ms: self.base_ms,
            multiplier: self.multiplier,
            jitter_ms: self.jitter_ms,
            cap_ms: self.cap_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Broadcast buffer; slower subscribers skip ahead
    pub channel_capacity: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            channel_capacity: system::DEFAULT_PROGRESS_CHANNEL_CAPACITY,
        }
    }
}

/// Maximum execution duration per task type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorsConfig {
    pub bulk_update_max_duration_secs: u64,
    pub deploy_sync_max_duration_secs: u64,
    pub deploy_refresh_max_duration_secs: u64,
    pub pr_workflow_max_duration_secs: u64,
    pub object_cleanup_max_duration_secs: u64,
}

impl Default for ExecutorsConfig {
    fn default() -> Self {
        Self {
            bulk_update_max_duration_secs: 600,
            deploy_sync_max_duration_secs: 300,
            deploy_refresh_max_duration_secs: 120,
            pr_workflow_max_duration_secs: 120,
            object_cleanup_max_duration_secs: 900,
        }
    }
}

impl ExecutorsConfig {
    pub fn max_duration(&self, task_type: TaskType) -> Duration {
        let secs = match task_type {
            TaskType::BulkUpdate => self.bulk_update_max_duration_secs,
            TaskType::DeploySync => self.deploy_sync_max_duration_secs,
            TaskType::DeployRefresh => self.deploy_refresh_max_duration_secs,
            TaskType::PrWorkflow => self.pr_workflow_max_duration_secs,
            TaskType::ObjectCleanup => self.object_cleanup_max_duration_secs,
        };
        Duration::from_secs(secs)
    }
}
