use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Directed dependency between two tasks of the same tenant.
///
/// `dependent_task_uuid` may only start once `depends_on_task_uuid` has succeeded.
/// Maps to the `opsflow_task_edges` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TaskDependencyEdge {
    pub dependent_task_uuid: Uuid,
    pub depends_on_task_uuid: Uuid,
    pub tenant_id: String,
    pub created_at: DateTime<Utc>,
}

impl TaskDependencyEdge {
    pub fn new(
        dependent_task_uuid: Uuid,
        depends_on_task_uuid: Uuid,
        tenant_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            dependent_task_uuid,
            depends_on_task_uuid,
            tenant_id: tenant_id.into(),
            created_at,
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.dependent_task_uuid == self.depends_on_task_uuid
    }
}
