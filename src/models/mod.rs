//! # Data Model
//!
//! Durable entities owned by the task store and the audit logger.
//!
//! - [`Task`] and [`TaskDependencyEdge`] belong to the task store
//! - [`AuditLogEntry`] belongs to the audit logger
//!
//! Rate-limit buckets are ephemeral and live in [`crate::rate_limit`].

pub mod audit_log_entry;
pub mod backoff_policy;
pub mod task;
pub mod task_dependency_edge;
pub mod task_type;

pub use audit_log_entry::{AuditLogEntry, AuditStatus};
pub use backoff_policy::BackoffPolicy;
pub use task::{
    AttemptOutcome, CancelOutcome, ClaimToken, NewTask, Task, TaskFailure, TaskFilter,
};
pub use task_dependency_edge::TaskDependencyEdge;
pub use task_type::TaskType;
