//! Transition table for the task lifecycle.
//!
//! ```text
//! Pending --dependencies_satisfied--> Ready --claim--> Running --succeed--> Succeeded
//!    ^                                                    |
//!    +---------------------- retry -----------------------+--dead_letter--> DeadLettered
//! any non-terminal --ancestor_failed--> Cancelled
//! Pending/Ready/Running --cancel--> Cancelled
//! Pending/Ready --force_fail--> Failed
//! ```
//!
//! Both stores consult [`next_state`] before writing, so an illegal transition is
//! rejected identically whether the datastore is in memory or PostgreSQL.

use super::events::TaskEvent;
use super::states::TaskStatus;
use crate::error::{OrchestratorError, Result};

/// Resolve the target state for `event` applied in `current`.
pub fn next_state(current: TaskStatus, event: TaskEvent) -> Result<TaskStatus> {
    use TaskEvent as E;
    use TaskStatus as S;

    let target = match (current, event) {
        (S::Pending, E::DependenciesSatisfied) => S::Ready,
        // Claims are guarded on `Pending | Ready`; promotion may not have run yet.
        (S::Pending | S::Ready, E::Claim) => S::Running,
        (S::Running, E::Succeed) => S::Succeeded,
        (S::Running, E::Retry) => S::Pending,
        (S::Running, E::DeadLetter) => S::DeadLettered,
        (S::Pending | S::Ready | S::Running, E::AncestorFailed) => S::Cancelled,
        (S::Pending | S::Ready | S::Running, E::Cancel) => S::Cancelled,
        (S::Pending | S::Ready, E::ForceFail) => S::Failed,
        (from, event) => {
            return Err(OrchestratorError::validation(format!(
                "invalid transition: {} from {from}",
                event.event_type()
            ))
            .with_details(serde_json::json!({
                "from": from,
                "event": event,
            })))
        }
    };

    Ok(target)
}

/// Whether `event` is legal from `current`.
pub fn can_transition(current: TaskStatus, event: TaskEvent) -> bool {
    next_state(current, event).is_ok()
}
