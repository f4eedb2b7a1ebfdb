use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of an orchestrator task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting on dependencies or on its backoff delay
    #[default]
    Pending,
    /// Dependencies satisfied and delay elapsed, waiting for a worker
    Ready,
    /// Claimed by a worker; the status itself is the claim
    Running,
    /// Completed successfully
    Succeeded,
    /// Force-failed by an operator before it ran
    Failed,
    /// Exhausted its attempts or failed terminally
    DeadLettered,
    /// Cancelled explicitly or because a prerequisite did not succeed
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        Self::Pending,
        Self::Ready,
        Self::Running,
        Self::Succeeded,
        Self::Failed,
        Self::DeadLettered,
        Self::Cancelled,
    ];

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::DeadLettered | Self::Cancelled
        )
    }

    /// Terminal states that doom every dependent task
    pub fn is_unsuccessful_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::DeadLettered | Self::Cancelled)
    }

    /// Check if this task satisfies dependencies for other tasks
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// States from which a worker may claim the task
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::Ready)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "dead_lettered" => Ok(Self::DeadLettered),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}
