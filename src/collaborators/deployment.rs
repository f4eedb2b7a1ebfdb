//! Deployment-synchronization service contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::CollaboratorResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    pub project: String,
    pub sync_status: String,
    pub health_status: String,
    pub revision: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub revision: Option<String>,
    pub prune: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub application: String,
    pub revision: Option<String>,
    pub phase: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub revision: String,
    pub deployed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationResource {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub status: String,
    pub health: Option<String>,
}

#[async_trait]
pub trait DeploymentSync: Send + Sync {
    async fn list_applications(&self, project: Option<&str>) -> CollaboratorResult<Vec<Application>>;

    async fn sync_application(&self, name: &str, options: &SyncOptions) -> CollaboratorResult<SyncResult>;

    async fn refresh_application(&self, name: &str) -> CollaboratorResult<()>;

    async fn application_history(&self, name: &str) -> CollaboratorResult<Vec<HistoryEntry>>;

    async fn application_resources(&self, name: &str) -> CollaboratorResult<Vec<ApplicationResource>>;
}
