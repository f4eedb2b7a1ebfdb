//! Process-local collaborator implementations for local runs and tests.
//!
//! Each keeps its state behind a `parking_lot::Mutex` and supports scripted
//! failures, so retry and cascade behaviour can be exercised without network
//! services.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};

use super::deployment::{
    Application, ApplicationResource, DeploymentSync, HistoryEntry, SyncOptions, SyncResult,
};
use super::error::{CollaboratorError, CollaboratorResult};
use super::object_storage::{ObjectPage, ObjectStorage, SignedUrlMethod, SignedUrlOptions, StoredObject};
use super::observability::{Alert, Dashboard, Folder, ObservabilityRenderer, RenderParams, RenderStream};
use super::source_control::{
    Branch, FileContent, FileWrite, NewPullRequest, PullRequest, PullRequestState, Repository,
    SourceControl,
};

/// Failures returned, in order, by the next calls to a scripted operation
#[derive(Debug, Default)]
struct FailureScript {
    queued: VecDeque<CollaboratorError>,
}

impl FailureScript {
    fn next(&mut self) -> CollaboratorResult<()> {
        match self.queued.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct SourceControlState {
    repositories: Vec<Repository>,
    branches: HashMap<String, Vec<Branch>>,
    files: HashMap<(String, String, String), FileContent>,
    pull_requests: HashMap<String, Vec<PullRequest>>,
    revision: u64,
    failures: FailureScript,
}

impl SourceControlState {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        format!("rev-{}", self.revision)
    }

    fn require_repo(&self, repo: &str) -> CollaboratorResult<()> {
        if self.repositories.iter().any(|r| r.name == repo) {
            Ok(())
        } else {
            Err(CollaboratorError::NotFound(format!("repository {repo}")))
        }
    }

    fn has_branch(&self, repo: &str, branch: &str) -> bool {
        self.branches
            .get(repo)
            .is_some_and(|branches| branches.iter().any(|b| b.name == branch))
    }
}

#[derive(Debug, Default)]
pub struct InMemorySourceControl {
    state: Mutex<SourceControlState>,
}

impl InMemorySourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repository(self, name: &str, default_branch: &str) -> Self {
        {
            let mut state = self.state.lock();
            state.repositories.push(Repository {
                name: name.to_string(),
                full_name: format!("acme/{name}"),
                default_branch: default_branch.to_string(),
                private: true,
            });
            let sha = state.next_revision();
            state.branches.insert(
                name.to_string(),
                vec![Branch {
                    name: default_branch.to_string(),
                    sha,
                }],
            );
        }
        self
    }

    pub fn with_file(self, repo: &str, branch: &str, path: &str, content: &str) -> Self {
        {
            let mut state = self.state.lock();
            let revision = state.next_revision();
            state.files.insert(
                (repo.to_string(), branch.to_string(), path.to_string()),
                FileContent {
                    path: path.to_string(),
                    content: content.to_string(),
                    revision,
                },
            );
        }
        self
    }

    /// Fail the next write calls with these errors
    pub fn fail_next(&self, errors: impl IntoIterator<Item = CollaboratorError>) {
        self.state.lock().failures.queued.extend(errors);
    }

    pub fn file(&self, repo: &str, branch: &str, path: &str) -> Option<FileContent> {
        self.state
            .lock()
            .files
            .get(&(repo.to_string(), branch.to_string(), path.to_string()))
            .cloned()
    }

    pub fn pull_requests(&self, repo: &str) -> Vec<PullRequest> {
        self.state.lock().pull_requests.get(repo).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SourceControl for InMemorySourceControl {
    async fn list_repositories(&self) -> CollaboratorResult<Vec<Repository>> {
        Ok(self.state.lock().repositories.clone())
    }

    async fn list_branches(&self, repo: &str) -> CollaboratorResult<Vec<Branch>> {
        let state = self.state.lock();
        state.require_repo(repo)?;
        Ok(state.branches.get(repo).cloned().unwrap_or_default())
    }

    async fn create_branch(&self, repo: &str, name: &str, from: &str) -> CollaboratorResult<Branch> {
        let mut state = self.state.lock();
        state.failures.next()?;
        state.require_repo(repo)?;
        if state.has_branch(repo, name) {
            return Err(CollaboratorError::Conflict(format!("branch {name} already exists")));
        }
        if !state.has_branch(repo, from) {
            return Err(CollaboratorError::NotFound(format!("branch {from}")));
        }
        let copied: Vec<_> = state
            .files
            .iter()
            .filter(|((r, b, _), _)| r == repo && b == from)
            .map(|((r, _, p), f)| ((r.clone(), name.to_string(), p.clone()), f.clone()))
            .collect();
        state.files.extend(copied);
        let branch = Branch {
            name: name.to_string(),
            sha: state.next_revision(),
        };
        state
            .branches
            .entry(repo.to_string())
            .or_default()
            .push(branch.clone());
        Ok(branch)
    }

    async fn list_pull_requests(
        &self,
        repo: &str,
        state_filter: PullRequestState,
    ) -> CollaboratorResult<Vec<PullRequest>> {
        let state = self.state.lock();
        state.require_repo(repo)?;
        Ok(state
            .pull_requests
            .get(repo)
            .map(|prs| {
                prs.iter()
                    .filter(|pr| state_filter == PullRequestState::All || pr.state == state_filter)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_pull_request(&self, request: &NewPullRequest) -> CollaboratorResult<PullRequest> {
        let mut state = self.state.lock();
        state.failures.next()?;
        state.require_repo(&request.repo)?;
        if request.head == request.base {
            return Err(CollaboratorError::Rejected("head and base are the same branch".into()));
        }
        let prs = state.pull_requests.entry(request.repo.clone()).or_default();
        let number = prs.len() as u64 + 1;
        let pr = PullRequest {
            number,
            title: request.title.clone(),
            head: request.head.clone(),
            base: request.base.clone(),
            state: PullRequestState::Open,
            url: format!("memory://{}/pull/{number}", request.repo),
        };
        prs.push(pr.clone());
        Ok(pr)
    }

    async fn get_file(&self, repo: &str, branch: &str, path: &str) -> CollaboratorResult<Option<FileContent>> {
        let state = self.state.lock();
        state.require_repo(repo)?;
        Ok(state
            .files
            .get(&(repo.to_string(), branch.to_string(), path.to_string()))
            .cloned())
    }

    async fn put_file(&self, write: &FileWrite) -> CollaboratorResult<FileContent> {
        let mut state = self.state.lock();
        state.failures.next()?;
        state.require_repo(&write.repo)?;
        if !state.has_branch(&write.repo, &write.branch) {
            return Err(CollaboratorError::NotFound(format!("branch {}", write.branch)));
        }
        let key = (write.repo.clone(), write.branch.clone(), write.path.clone());
        let current = state.files.get(&key).map(|f| f.revision.clone());
        if current != write.expected_revision {
            return Err(CollaboratorError::Conflict(format!(
                "{} changed since it was read",
                write.path
            )));
        }
        let file = FileContent {
            path: write.path.clone(),
            content: write.content.clone(),
            revision: state.next_revision(),
        };
        state.files.insert(key, file.clone());
        Ok(file)
    }
}

#[derive(Debug, Default)]
struct DeploymentState {
    applications: BTreeMap<String, Application>,
    history: HashMap<String, Vec<HistoryEntry>>,
    sync_failures: FailureScript,
    sync_calls: usize,
    refreshed: Vec<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryDeploymentSync {
    state: Mutex<DeploymentState>,
}

impl InMemoryDeploymentSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_application(self, name: &str, project: &str) -> Self {
        self.state.lock().applications.insert(
            name.to_string(),
            Application {
                name: name.to_string(),
                project: project.to_string(),
                sync_status: "OutOfSync".to_string(),
                health_status: "Healthy".to_string(),
                revision: None,
            },
        );
        self
    }

    /// Fail the next `sync_application` calls with these errors
    pub fn fail_next_syncs(&self, errors: impl IntoIterator<Item = CollaboratorError>) {
        self.state.lock().sync_failures.queued.extend(errors);
    }

    pub fn sync_calls(&self) -> usize {
        self.state.lock().sync_calls
    }

    pub fn refreshed(&self) -> Vec<String> {
        self.state.lock().refreshed.clone()
    }
}

#[async_trait]
impl DeploymentSync for InMemoryDeploymentSync {
    async fn list_applications(&self, project: Option<&str>) -> CollaboratorResult<Vec<Application>> {
        Ok(self
            .state
            .lock()
            .applications
            .values()
            .filter(|app| project.map_or(true, |p| app.project == p))
            .cloned()
            .collect())
    }

    async fn sync_application(&self, name: &str, options: &SyncOptions) -> CollaboratorResult<SyncResult> {
        let mut state = self.state.lock();
        state.sync_calls += 1;
        state.sync_failures.next()?;
        let revision = options.revision.clone().unwrap_or_else(|| "HEAD".to_string());
        let app = state
            .applications
            .get_mut(name)
            .ok_or_else(|| CollaboratorError::NotFound(format!("application {name}")))?;
        if !options.dry_run {
            app.sync_status = "Synced".to_string();
            app.revision = Some(revision.clone());
            let history = state.history.entry(name.to_string()).or_default();
            history.push(HistoryEntry {
                id: history.len() as i64 + 1,
                revision: revision.clone(),
                deployed_at: Utc::now(),
            });
        }
        Ok(SyncResult {
            application: name.to_string(),
            revision: Some(revision),
            phase: if options.dry_run { "DryRun" } else { "Succeeded" }.to_string(),
            message: None,
        })
    }

    async fn refresh_application(&self, name: &str) -> CollaboratorResult<()> {
        let mut state = self.state.lock();
        if !state.applications.contains_key(name) {
            return Err(CollaboratorError::NotFound(format!("application {name}")));
        }
        state.refreshed.push(name.to_string());
        Ok(())
    }

    async fn application_history(&self, name: &str) -> CollaboratorResult<Vec<HistoryEntry>> {
        Ok(self.state.lock().history.get(name).cloned().unwrap_or_default())
    }

    async fn application_resources(&self, name: &str) -> CollaboratorResult<Vec<ApplicationResource>> {
        let state = self.state.lock();
        let app = state
            .applications
            .get(name)
            .ok_or_else(|| CollaboratorError::NotFound(format!("application {name}")))?;
        Ok(vec![ApplicationResource {
            kind: "Deployment".to_string(),
            name: app.name.clone(),
            namespace: Some(app.project.clone()),
            status: app.sync_status.clone(),
            health: Some(app.health_status.clone()),
        }])
    }
}

#[derive(Debug, Default)]
struct ObjectState {
    objects: BTreeMap<String, StoredObject>,
    delete_failures: FailureScript,
}

#[derive(Debug, Default)]
pub struct InMemoryObjectStorage {
    state: Mutex<ObjectState>,
}

impl InMemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_objects<'a>(self, keys: impl IntoIterator<Item = &'a str>) -> Self {
        {
            let mut state = self.state.lock();
            for key in keys {
                state.objects.insert(
                    key.to_string(),
                    StoredObject {
                        key: key.to_string(),
                        size: key.len() as u64,
                        last_modified: Utc::now(),
                        etag: None,
                    },
                );
            }
        }
        self
    }

    pub fn fail_next_deletes(&self, errors: impl IntoIterator<Item = CollaboratorError>) {
        self.state.lock().delete_failures.queued.extend(errors);
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().objects.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn list_objects(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: u32,
    ) -> CollaboratorResult<ObjectPage> {
        let state = self.state.lock();
        let mut matching = state
            .objects
            .values()
            .filter(|o| o.key.starts_with(prefix))
            .filter(|o| continuation_token.map_or(true, |after| o.key.as_str() > after));
        let objects: Vec<StoredObject> = matching.by_ref().take(max_keys.max(1) as usize).cloned().collect();
        let more = matching.next().is_some();
        Ok(ObjectPage {
            next_continuation_token: if more {
                objects.last().map(|o| o.key.clone())
            } else {
                None
            },
            objects,
        })
    }

    async fn generate_signed_url(
        &self,
        key: &str,
        method: SignedUrlMethod,
        options: &SignedUrlOptions,
    ) -> CollaboratorResult<String> {
        let method = match method {
            SignedUrlMethod::Get => "GET",
            SignedUrlMethod::Put => "PUT",
        };
        Ok(format!(
            "memory://objects/{key}?method={method}&expires={}",
            options.expires_in.as_secs()
        ))
    }

    async fn delete_object(&self, key: &str) -> CollaboratorResult<()> {
        let mut state = self.state.lock();
        state.delete_failures.next()?;
        state.objects.remove(key);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryObservability {
    dashboards: Vec<Dashboard>,
    folders: Vec<Folder>,
    alerts: Vec<Alert>,
}

impl InMemoryObservability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dashboard(mut self, uid: &str, title: &str) -> Self {
        self.dashboards.push(Dashboard {
            uid: uid.to_string(),
            title: title.to_string(),
            folder_uid: None,
            url: format!("memory://d/{uid}"),
        });
        self
    }

    pub fn with_alert(mut self, id: &str, title: &str, state: &str) -> Self {
        self.alerts.push(Alert {
            id: id.to_string(),
            title: title.to_string(),
            state: state.to_string(),
            folder: None,
        });
        self
    }
}

#[async_trait]
impl ObservabilityRenderer for InMemoryObservability {
    async fn render_url(&self, params: &RenderParams) -> CollaboratorResult<String> {
        let mut url = format!(
            "memory://render/d/{}?from={}&to={}&width={}&height={}",
            params.dashboard_uid, params.from, params.to, params.width, params.height
        );
        if let Some(panel) = params.panel_id {
            url.push_str(&format!("&panelId={panel}"));
        }
        Ok(url)
    }

    async fn proxy_render(&self, url: &str) -> CollaboratorResult<RenderStream> {
        if !url.starts_with("memory://render/") {
            return Err(CollaboratorError::Rejected(format!("not a render url: {url}")));
        }
        let chunks: Vec<CollaboratorResult<Vec<u8>>> = vec![Ok(b"\x89PNG".to_vec()), Ok(url.as_bytes().to_vec())];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn list_alerts(&self) -> CollaboratorResult<Vec<Alert>> {
        Ok(self.alerts.clone())
    }

    async fn list_folders(&self) -> CollaboratorResult<Vec<Folder>> {
        Ok(self.folders.clone())
    }

    async fn list_dashboards(&self) -> CollaboratorResult<Vec<Dashboard>> {
        Ok(self.dashboards.clone())
    }
}
