//! # Progress Events
//!
//! Per-task lifecycle and progress events, fanned out to in-process subscribers and
//! external [`ProgressSink`]s.
//!
//! Only the worker holding a task's claim publishes progress for it, so events of
//! one attempt are ordered. Lifecycle events of one task may come from different
//! replicas; sequence numbers carry a per-replica origin tag so they never collide.
//! Delivery is at-least-once: consumers deduplicate on `(task_uuid, sequence)`.

pub mod publisher;
pub mod subscription;
pub mod types;

pub use publisher::{ProgressBroadcaster, ProgressSink};
pub use subscription::ProgressSubscription;
pub use types::{ProgressEvent, ProgressEventKind};
