use serde::{Deserialize, Serialize};
use std::fmt;

use crate::access::OperationClass;
use crate::rate_limit::RateLimitProfile;

/// Kinds of asynchronous work the orchestrator knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Multi-file edit of a configuration repository
    BulkUpdate,
    /// Sync a deployed application to its desired revision
    DeploySync,
    /// Refresh the observed state of deployed applications
    DeployRefresh,
    /// Open a pull request between two branches
    PrWorkflow,
    /// Delete every object under a storage prefix
    ObjectCleanup,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        Self::BulkUpdate,
        Self::DeploySync,
        Self::DeployRefresh,
        Self::PrWorkflow,
        Self::ObjectCleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BulkUpdate => "bulk_update",
            Self::DeploySync => "deploy_sync",
            Self::DeployRefresh => "deploy_refresh",
            Self::PrWorkflow => "pr_workflow",
            Self::ObjectCleanup => "object_cleanup",
        }
    }

    /// Minimum operation class a caller must hold to enqueue this type.
    pub fn operation_class(&self) -> OperationClass {
        match self {
            Self::BulkUpdate | Self::ObjectCleanup => OperationClass::Destructive,
            Self::DeploySync | Self::DeployRefresh | Self::PrWorkflow => OperationClass::Mutation,
        }
    }

    /// Rate-limit profile consulted before admitting a task of this type.
    pub fn rate_limit_profile(&self) -> RateLimitProfile {
        match self {
            Self::BulkUpdate | Self::ObjectCleanup => RateLimitProfile::Bulk,
            Self::DeploySync | Self::DeployRefresh => RateLimitProfile::Sync,
            Self::PrWorkflow => RateLimitProfile::General,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid task type: {s}"))
    }
}
