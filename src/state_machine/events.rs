use serde::{Deserialize, Serialize};

/// Events that can trigger task state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEvent {
    /// All prerequisites succeeded and `ready_at` has passed
    DependenciesSatisfied,
    /// A worker atomically claimed the task
    Claim,
    /// The executor returned a result
    Succeed,
    /// The attempt failed and attempts remain
    Retry,
    /// The attempt failed terminally or attempts are exhausted
    DeadLetter,
    /// A prerequisite reached an unsuccessful terminal state
    AncestorFailed,
    /// Explicit cancel request (or a running task acknowledging one)
    Cancel,
    /// Operator force-failed a task that has not started
    ForceFail,
}

impl TaskEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DependenciesSatisfied => "dependencies_satisfied",
            Self::Claim => "claim",
            Self::Succeed => "succeed",
            Self::Retry => "retry",
            Self::DeadLetter => "dead_letter",
            Self::AncestorFailed => "ancestor_failed",
            Self::Cancel => "cancel",
            Self::ForceFail => "force_fail",
        }
    }
}
