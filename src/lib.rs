#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Opsflow Core
//!
//! Tenant-scoped operation orchestrator for Git-backed configuration and
//! deployment-sync workflows.
//!
//! ## Overview
//!
//! Long-running operations (multi-file repository edits, deployment syncs and
//! refreshes, pull request pipelines, object cleanup) are admitted as durable
//! tasks, scheduled across a bounded worker pool with per-tenant fairness,
//! retried with exponential backoff, and observed through a progress stream.
//! Short operations go through a synchronous gateway. Both paths share the same
//! role guard, rate limiter and audit log.
//!
//! ## Architecture
//!
//! ```text
//! caller -> AccessContext -> RateLimiter -+-> OperationGateway -> collaborator -> AuditLogger
//!                                         |
//!                                         +-> TaskStore -> Scheduler -> TaskExecutor
//!                                                             |-> RetryEngine
//!                                                             |-> ProgressBroadcaster
//!                                                             +-> AuditLogger
//! ```
//!
//! Replicas share nothing in memory. All cross-replica coordination happens
//! through the task store's atomic claim.
//!
//! ## Module Organization
//!
//! - [`access`] - Caller identity, tenant and role guard
//! - [`audit`] - Append-only audit trail
//! - [`collaborators`] - Source control, deployment, object storage and observability interfaces
//! - [`config`] - Layered TOML configuration
//! - [`database`] - Task store trait with PostgreSQL and in-memory implementations
//! - [`error`] - Error taxonomy and stable error codes
//! - [`events`] - Progress events and subscriptions
//! - [`executors`] - Built-in task executors
//! - [`operations`] - Synchronous operation gateway
//! - [`orchestration`] - Scheduler, retry engine, lifecycle and public API
//! - [`rate_limit`] - Per-caller admission control
//! - [`state_machine`] - Task status transitions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use opsflow_core::access::{AccessContext, Role};
//! use opsflow_core::collaborators::{Collaborators, InMemoryDeploymentSync};
//! use opsflow_core::config::OrchestratorConfig;
//! use opsflow_core::executors::default_registry;
//! use opsflow_core::models::TaskType;
//! use opsflow_core::orchestration::{EnqueueRequest, Orchestrator, OrchestratorContext};
//! use std::sync::Arc;
//!
//! # async fn example() -> opsflow_core::Result<()> {
//! let config = OrchestratorConfig::default();
//! let registry = default_registry(&config.executors);
//! let collaborators = Collaborators::new().with_deployment(Arc::new(
//!     InMemoryDeploymentSync::new().with_application("billing", "payments"),
//! ));
//! let orchestrator = Orchestrator::new(OrchestratorContext::in_memory(config, collaborators), registry);
//! orchestrator.start()?;
//!
//! let caller = AccessContext::new("alice", "acme", Role::ReadWrite);
//! let task_uuid = orchestrator
//!     .enqueue_task(
//!         &caller,
//!         EnqueueRequest::new(TaskType::DeploySync, serde_json::json!({ "application": "billing" })),
//!     )
//!     .await?;
//! let task = orchestrator.get_task_status(&caller, task_uuid).await?;
//! println!("{} is {}", task.task_uuid, task.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                      # Unit and in-memory integration tests
//! cargo test --features test-db   # Also runs the PostgreSQL store tests against DATABASE_URL
//! ```

pub mod access;
pub mod audit;
pub mod collaborators;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod events;
pub mod executors;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod operations;
pub mod orchestration;
pub mod rate_limit;
pub mod state_machine;

pub use access::{AccessContext, Role};
pub use config::{ConfigManager, OrchestratorConfig};
pub use error::{ErrorKind, OrchestratorError, Result};
pub use models::{Task, TaskType};
pub use operations::OperationGateway;
pub use orchestration::{EnqueueRequest, Orchestrator, OrchestratorContext};
pub use state_machine::TaskStatus;
