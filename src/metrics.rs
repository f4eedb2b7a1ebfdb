//! # Orchestrator Metrics
//!
//! OpenTelemetry counters for the task lifecycle and rate-limit decisions.
//! Instruments come from the global meter provider; exporter wiring is left to the
//! embedding process.
//!
//! ```rust
//! use opsflow_core::metrics::tasks_enqueued_total;
//! use opentelemetry::KeyValue;
//!
//! tasks_enqueued_total().add(1, &[KeyValue::new("task_type", "deploy_sync")]);
//! ```

use opentelemetry::metrics::{Counter, Meter};
use std::sync::OnceLock;

static ORCHESTRATOR_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    ORCHESTRATOR_METER.get_or_init(|| opentelemetry::global::meter("opsflow"))
}

/// Tasks accepted by `enqueue_task`
///
/// Labels:
/// - task_type
pub fn tasks_enqueued_total() -> Counter<u64> {
    meter()
        .u64_counter("opsflow.tasks.enqueued.total")
        .with_description("Total number of tasks enqueued")
        .build()
}

/// Attempts claimed by this replica
///
/// Labels:
/// - task_type
pub fn tasks_claimed_total() -> Counter<u64> {
    meter()
        .u64_counter("opsflow.tasks.claimed.total")
        .with_description("Total number of task attempts claimed")
        .build()
}

pub fn tasks_succeeded_total() -> Counter<u64> {
    meter()
        .u64_counter("opsflow.tasks.succeeded.total")
        .with_description("Total number of tasks that succeeded")
        .build()
}

/// Failed attempts that were re-queued with backoff
///
/// Labels:
/// - task_type
/// - error_code
pub fn tasks_retried_total() -> Counter<u64> {
    meter()
        .u64_counter("opsflow.tasks.retried.total")
        .with_description("Total number of failed attempts scheduled for retry")
        .build()
}

/// Labels:
/// - task_type
/// - error_code
pub fn tasks_dead_lettered_total() -> Counter<u64> {
    meter()
        .u64_counter("opsflow.tasks.dead_lettered.total")
        .with_description("Total number of tasks dead-lettered")
        .build()
}

pub fn tasks_cancelled_total() -> Counter<u64> {
    meter()
        .u64_counter("opsflow.tasks.cancelled.total")
        .with_description("Total number of tasks cancelled")
        .build()
}

/// Requests rejected by the rate limiter
///
/// Labels:
/// - profile
pub fn rate_limit_rejections_total() -> Counter<u64> {
    meter()
        .u64_counter("opsflow.rate_limit.rejections.total")
        .with_description("Total number of requests rejected by the rate limiter")
        .build()
}
