//! # Orchestration Engine
//!
//! Admission, scheduling, execution and retry of asynchronous tasks.
//!
//! ## Core Components
//!
//! - **Orchestrator**: public API (enqueue, status, cancel, subscribe, dependencies)
//! - **Scheduler**: promotion, claiming, attempt execution, deadline reaping
//! - **RetryEngine**: retry-or-dead-letter decisions with exponential backoff
//! - **TaskLifecycle**: audit, progress, metrics and cascades for every transition
//! - **ExecutorRegistry**: the [`TaskExecutor`] for each task type
//! - **ProgressHandle**: progress reporting and cancellation for a running attempt
//! - **OrchestratorContext**: the injected store, audit, progress and limiter handles

pub mod backoff_calculator;
pub mod context;
pub mod lifecycle;
pub mod orchestrator;
pub mod progress_handle;
pub mod scheduler;
pub mod task_executor;

pub use backoff_calculator::{DeadLetterReason, RetryDecision, RetryEngine};
pub use context::OrchestratorContext;
pub use lifecycle::TaskLifecycle;
pub use orchestrator::{EnqueueRequest, Orchestrator};
pub use progress_handle::ProgressHandle;
pub use scheduler::Scheduler;
pub use task_executor::{parse_payload, ExecutionContext, ExecutorRegistry, TaskExecutor};
