//! # System Constants
//!
//! Operation names recorded in the audit log, resource type labels, and the
//! operational defaults shared by configuration and the scheduler.

/// Audit operation names for task lifecycle transitions
pub mod task_operations {
    pub const ENQUEUE: &str = "task.enqueue";
    pub const CLAIM: &str = "task.claim";
    pub const READY: &str = "task.ready";
    pub const SUCCEED: &str = "task.succeed";
    pub const RETRY: &str = "task.retry";
    pub const DEAD_LETTER: &str = "task.dead_letter";
    pub const CANCEL: &str = "task.cancel";
    pub const CANCEL_REQUESTED: &str = "task.cancel_requested";
    pub const FAIL: &str = "task.fail";
    pub const ADD_DEPENDENCY: &str = "task.add_dependency";
}

/// Audit operation names for work done inside executors and the synchronous gateway
pub mod resource_operations {
    pub const FILE_UPDATE: &str = "file.update";
    pub const BRANCH_CREATE: &str = "branch.create";
    pub const PULL_REQUEST_CREATE: &str = "pull_request.create";
    pub const APPLICATION_SYNC: &str = "application.sync";
    pub const APPLICATION_REFRESH: &str = "application.refresh";
    pub const OBJECT_DELETE: &str = "object.delete";
    pub const OBJECT_SIGN_UPLOAD: &str = "object.sign_upload";
}

/// `resource_type` labels on audit entries
pub mod resource_types {
    pub const TASK: &str = "task";
    pub const FILE: &str = "file";
    pub const BRANCH: &str = "branch";
    pub const PULL_REQUEST: &str = "pull_request";
    pub const APPLICATION: &str = "application";
    pub const OBJECT: &str = "object";
}

/// Operational defaults
pub mod system {
    /// Value of `OPSFLOW_ENV` when unset
    pub const DEFAULT_ENVIRONMENT: &str = "development";

    /// Prefix for environment variable overrides (`OPSFLOW__SECTION__KEY`)
    pub const ENV_PREFIX: &str = "OPSFLOW";

    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub const DEFAULT_WORKER_POOL_SIZE: usize = 8;

    pub const DEFAULT_TENANT_CONCURRENCY: usize = 4;

    pub const DEFAULT_PROGRESS_CHANNEL_CAPACITY: usize = 1024;

    /// Upper bound on `list_tasks` page size
    pub const MAX_LIST_LIMIT: usize = 500;

    /// Page size used when paging through object storage
    pub const OBJECT_PAGE_SIZE: u32 = 1000;
}
