//! Source-control provider contract (repositories, branches, files, pull requests).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::CollaboratorResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub default_branch: String,
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    /// Head commit
    pub sha: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    #[default]
    Open,
    Closed,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub head: String,
    pub base: String,
    pub state: PullRequestState,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPullRequest {
    pub repo: String,
    pub title: String,
    pub head: String,
    pub base: String,
    #[serde(default)]
    pub body: String,
}

/// File content at a revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    /// Blob revision; passed back on write for optimistic concurrency
    pub revision: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWrite {
    pub repo: String,
    pub branch: String,
    pub path: String,
    pub content: String,
    pub message: String,
    /// Revision the edit was based on; `None` creates the file
    pub expected_revision: Option<String>,
}

#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn list_repositories(&self) -> CollaboratorResult<Vec<Repository>>;

    async fn list_branches(&self, repo: &str) -> CollaboratorResult<Vec<Branch>>;

    async fn create_branch(&self, repo: &str, name: &str, from: &str) -> CollaboratorResult<Branch>;

    async fn list_pull_requests(
        &self,
        repo: &str,
        state: PullRequestState,
    ) -> CollaboratorResult<Vec<PullRequest>>;

    async fn create_pull_request(&self, request: &NewPullRequest) -> CollaboratorResult<PullRequest>;

    /// `None` when the file does not exist on the branch
    async fn get_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> CollaboratorResult<Option<FileContent>>;

    /// Write a file; a stale `expected_revision` fails with `Conflict`
    async fn put_file(&self, write: &FileWrite) -> CollaboratorResult<FileContent>;
}
