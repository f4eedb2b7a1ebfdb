//! In-process [`TaskStore`].
//!
//! All state sits behind a single mutex, so every trait method is atomic. Suitable
//! for tests and single-replica deployments; replicas sharing work need
//! [`PgTaskStore`](super::PgTaskStore).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::task_store::{ancestor_failure, ClaimRequest, TaskStore};
use crate::constants::system;
use crate::error::{OrchestratorError, Result};
use crate::models::{
    AttemptOutcome, CancelOutcome, ClaimToken, Task, TaskDependencyEdge, TaskFailure, TaskFilter,
};
use crate::state_machine::{next_state, TaskEvent, TaskStatus};

#[derive(Debug, Default)]
struct StoreState {
    tasks: HashMap<Uuid, Task>,
    /// dependent -> edges to its prerequisites
    prerequisites: HashMap<Uuid, Vec<TaskDependencyEdge>>,
    /// prerequisite -> dependents
    dependents: HashMap<Uuid, Vec<Uuid>>,
}

impl StoreState {
    fn task(&self, task_uuid: Uuid) -> Result<&Task> {
        self.tasks
            .get(&task_uuid)
            .ok_or_else(|| OrchestratorError::not_found(format!("task {task_uuid}")))
    }

    fn prerequisite_ids(&self, task_uuid: Uuid) -> impl Iterator<Item = Uuid> + '_ {
        self.prerequisites
            .get(&task_uuid)
            .into_iter()
            .flatten()
            .map(|e| e.depends_on_task_uuid)
    }

    fn dependencies_satisfied(&self, task_uuid: Uuid) -> bool {
        self.prerequisite_ids(task_uuid).all(|id| {
            self.tasks
                .get(&id)
                .is_some_and(|t| t.status.satisfies_dependencies())
        })
    }

    fn blocking_prerequisite(&self, task_uuid: Uuid) -> Option<Uuid> {
        self.prerequisite_ids(task_uuid).find(|id| {
            self.tasks
                .get(id)
                .is_some_and(|t| t.status.is_unsuccessful_terminal())
        })
    }

    fn is_claimable(&self, task: &Task, now: DateTime<Utc>) -> bool {
        task.status.is_claimable()
            && task.ready_at <= now
            && !task.cancel_requested
            && task.attempt < task.max_attempts
            && self.dependencies_satisfied(task.task_uuid)
    }

    /// Whether `target` is reachable from `from` by following prerequisite edges
    fn depends_transitively(&self, from: Uuid, target: Uuid) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if seen.insert(current) {
                stack.extend(self.prerequisite_ids(current));
            }
        }
        false
    }

    fn running_count(&self, tenant_id: &str) -> usize {
        self.tasks
            .values()
            .filter(|t| t.tenant_id == tenant_id && t.status == TaskStatus::Running)
            .count()
    }

    fn claimed_mut(&mut self, token: &ClaimToken) -> Option<&mut Task> {
        self.tasks.get_mut(&token.task_uuid).filter(|t| {
            t.status == TaskStatus::Running
                && t.attempt == token.attempt
                && t.claimed_by.as_deref() == Some(token.worker_id.as_str())
        })
    }

    fn cancel_not_started(
        &mut self,
        task_uuid: Uuid,
        event: TaskEvent,
        failure: Option<TaskFailure>,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let task = self
            .tasks
            .get_mut(&task_uuid)
            .ok_or_else(|| OrchestratorError::not_found(format!("task {task_uuid}")))?;
        task.status = next_state(task.status, event)?;
        task.completed_at = Some(now);
        task.cancel_requested = true;
        if failure.is_some() {
            task.last_error = failure;
        }
        Ok(task.clone())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    state: Mutex<StoreState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_task(&self, task: &Task, depends_on: &[Uuid]) -> Result<()> {
        let mut state = self.state.lock();
        if state.tasks.contains_key(&task.task_uuid) {
            return Err(OrchestratorError::validation(format!(
                "task {} already exists",
                task.task_uuid
            )));
        }
        for prerequisite in depends_on {
            let existing = state.task(*prerequisite)?;
            if existing.tenant_id != task.tenant_id {
                return Err(OrchestratorError::validation(format!(
                    "prerequisite {prerequisite} belongs to another tenant"
                )));
            }
        }

        let unique: BTreeSet<Uuid> = depends_on.iter().copied().collect();
        let edges: Vec<_> = unique
            .into_iter()
            .map(|id| TaskDependencyEdge::new(task.task_uuid, id, task.tenant_id.clone(), task.created_at))
            .collect();
        for edge in &edges {
            state
                .dependents
                .entry(edge.depends_on_task_uuid)
                .or_default()
                .push(task.task_uuid);
        }
        if !edges.is_empty() {
            state.prerequisites.insert(task.task_uuid, edges);
        }
        state.tasks.insert(task.task_uuid, task.clone());
        Ok(())
    }

    async fn add_dependency(&self, edge: &TaskDependencyEdge) -> Result<()> {
        if edge.is_self_loop() {
            return Err(OrchestratorError::validation("a task cannot depend on itself"));
        }
        let mut state = self.state.lock();
        let dependent = state.task(edge.dependent_task_uuid)?.clone();
        let prerequisite = state.task(edge.depends_on_task_uuid)?.clone();

        if dependent.tenant_id != prerequisite.tenant_id || dependent.tenant_id != edge.tenant_id {
            return Err(OrchestratorError::validation(
                "dependencies may only connect tasks of the same tenant",
            ));
        }
        if state
            .prerequisite_ids(edge.dependent_task_uuid)
            .any(|id| id == edge.depends_on_task_uuid)
        {
            return Ok(());
        }
        let accepts = match dependent.status {
            TaskStatus::Pending => true,
            TaskStatus::Ready => prerequisite.status.satisfies_dependencies(),
            _ => false,
        };
        if !accepts {
            return Err(OrchestratorError::validation(format!(
                "task {} is {} and can no longer gain prerequisites",
                dependent.task_uuid, dependent.status
            )));
        }
        if state.depends_transitively(edge.depends_on_task_uuid, edge.dependent_task_uuid) {
            return Err(OrchestratorError::validation(format!(
                "dependency {} -> {} would create a cycle",
                edge.dependent_task_uuid, edge.depends_on_task_uuid
            )));
        }

        state
            .prerequisites
            .entry(edge.dependent_task_uuid)
            .or_default()
            .push(edge.clone());
        state
            .dependents
            .entry(edge.depends_on_task_uuid)
            .or_default()
            .push(edge.dependent_task_uuid);
        Ok(())
    }

    async fn get_task(&self, task_uuid: Uuid) -> Result<Option<Task>> {
        Ok(self.state.lock().tasks.get(&task_uuid).cloned())
    }

    async fn list_tasks(&self, tenant_id: &str, filter: &TaskFilter) -> Result<Vec<Task>> {
        let state = self.state.lock();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.tenant_id == tenant_id)
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| filter.task_type.map_or(true, |ty| t.task_type == ty))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.task_uuid.cmp(&a.task_uuid)));
        tasks.truncate(filter.limit.unwrap_or(system::MAX_LIST_LIMIT).min(system::MAX_LIST_LIMIT));
        Ok(tasks)
    }

    async fn dependencies_of(&self, task_uuid: Uuid) -> Result<Vec<TaskDependencyEdge>> {
        Ok(self
            .state
            .lock()
            .prerequisites
            .get(&task_uuid)
            .cloned()
            .unwrap_or_default())
    }

    async fn promote_ready(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut state = self.state.lock();
        let promotable: Vec<Uuid> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && state.is_claimable(t, now))
            .map(|t| t.task_uuid)
            .collect();

        let mut promoted = Vec::with_capacity(promotable.len());
        for task_uuid in promotable {
            if let Some(task) = state.tasks.get_mut(&task_uuid) {
                task.status = next_state(task.status, TaskEvent::DependenciesSatisfied)?;
                promoted.push(task.clone());
            }
        }
        Ok(promoted)
    }

    async fn tenants_with_ready_work(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let state = self.state.lock();
        let tenants: BTreeSet<String> = state
            .tasks
            .values()
            .filter(|t| state.is_claimable(t, now))
            .map(|t| t.tenant_id.clone())
            .collect();
        Ok(tenants.into_iter().collect())
    }

    async fn claim_next(&self, request: &ClaimRequest) -> Result<Option<Task>> {
        let mut state = self.state.lock();
        if state.running_count(&request.tenant_id) >= request.tenant_cap {
            return Ok(None);
        }
        let types = request.task_types();
        let candidate = state
            .tasks
            .values()
            .filter(|t| t.tenant_id == request.tenant_id && types.contains(&t.task_type))
            .filter(|t| state.is_claimable(t, request.now))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.task_uuid.cmp(&b.task_uuid))
            })
            .map(|t| t.task_uuid);

        let Some(task_uuid) = candidate else {
            return Ok(None);
        };
        let Some(task) = state.tasks.get_mut(&task_uuid) else {
            return Ok(None);
        };
        task.status = next_state(task.status, TaskEvent::Claim)?;
        task.attempt += 1;
        task.progress = 0;
        task.result = None;
        task.started_at = Some(request.now);
        task.claimed_by = Some(request.worker_id.clone());
        task.deadline_at = request.deadline_for(task.task_type);
        debug!(task_uuid = %task_uuid, attempt = task.attempt, "Claimed task");
        Ok(Some(task.clone()))
    }

    async fn update_progress(&self, token: &ClaimToken, percent: u8) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(task) = state.claimed_mut(token) else {
            return Ok(false);
        };
        task.progress = task.progress.max(percent.min(100));
        Ok(true)
    }

    async fn finish_attempt(
        &self,
        token: &ClaimToken,
        outcome: AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let mut state = self.state.lock();
        let Some(task) = state.claimed_mut(token) else {
            return Ok(None);
        };
        match outcome {
            AttemptOutcome::Succeeded { result } => {
                task.status = next_state(task.status, TaskEvent::Succeed)?;
                task.result = Some(result);
                task.progress = 100;
                task.completed_at = Some(now);
            }
            AttemptOutcome::Retry { failure, ready_at } => {
                task.status = next_state(task.status, TaskEvent::Retry)?;
                task.last_error = Some(failure);
                task.ready_at = ready_at;
                task.claimed_by = None;
            }
            AttemptOutcome::DeadLettered { failure } => {
                task.status = next_state(task.status, TaskEvent::DeadLetter)?;
                task.last_error = Some(failure);
                task.completed_at = Some(now);
            }
            AttemptOutcome::Cancelled { failure } => {
                task.status = next_state(task.status, TaskEvent::Cancel)?;
                if failure.is_some() {
                    task.last_error = failure;
                }
                task.completed_at = Some(now);
            }
        }
        task.deadline_at = None;
        Ok(Some(task.clone()))
    }

    async fn request_cancel(&self, task_uuid: Uuid, now: DateTime<Utc>) -> Result<CancelOutcome> {
        let mut state = self.state.lock();
        let status = state.task(task_uuid)?.status;
        match status {
            TaskStatus::Pending | TaskStatus::Ready => {
                let task = state.cancel_not_started(task_uuid, TaskEvent::Cancel, None, now)?;
                Ok(CancelOutcome::Cancelled(task))
            }
            TaskStatus::Running => {
                let task = state
                    .tasks
                    .get_mut(&task_uuid)
                    .ok_or_else(|| OrchestratorError::not_found(format!("task {task_uuid}")))?;
                task.cancel_requested = true;
                Ok(CancelOutcome::Requested(task.clone()))
            }
            _ => Ok(CancelOutcome::AlreadyTerminal(state.task(task_uuid)?.clone())),
        }
    }

    async fn is_cancel_requested(&self, task_uuid: Uuid) -> Result<bool> {
        Ok(self.state.lock().task(task_uuid)?.cancel_requested)
    }

    async fn force_fail(
        &self,
        task_uuid: Uuid,
        failure: TaskFailure,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let mut state = self.state.lock();
        let task = state
            .tasks
            .get_mut(&task_uuid)
            .ok_or_else(|| OrchestratorError::not_found(format!("task {task_uuid}")))?;
        task.status = next_state(task.status, TaskEvent::ForceFail)?;
        task.last_error = Some(failure);
        task.completed_at = Some(now);
        Ok(task.clone())
    }

    async fn cancel_dependents(&self, task_uuid: Uuid, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut state = self.state.lock();
        let mut cancelled = Vec::new();
        let mut queue: VecDeque<Uuid> = VecDeque::from([task_uuid]);
        let mut visited = HashSet::from([task_uuid]);

        while let Some(prerequisite) = queue.pop_front() {
            let dependents = state.dependents.get(&prerequisite).cloned().unwrap_or_default();
            for dependent in dependents {
                if !visited.insert(dependent) {
                    continue;
                }
                let Some(task) = state.tasks.get(&dependent) else {
                    continue;
                };
                match task.status {
                    TaskStatus::Pending | TaskStatus::Ready => {
                        let failure = ancestor_failure(prerequisite, task.attempt, now);
                        let task = state.cancel_not_started(
                            dependent,
                            TaskEvent::AncestorFailed,
                            Some(failure),
                            now,
                        )?;
                        cancelled.push(task);
                        queue.push_back(dependent);
                    }
                    TaskStatus::Running => {
                        if let Some(task) = state.tasks.get_mut(&dependent) {
                            task.cancel_requested = true;
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(cancelled)
    }

    async fn cancel_blocked(&self, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut state = self.state.lock();
        let mut cancelled = Vec::new();
        loop {
            let blocked: Vec<(Uuid, Uuid)> = state
                .tasks
                .values()
                .filter(|t| t.status.is_claimable())
                .filter_map(|t| {
                    state
                        .blocking_prerequisite(t.task_uuid)
                        .map(|p| (t.task_uuid, p))
                })
                .collect();
            if blocked.is_empty() {
                break;
            }
            for (task_uuid, prerequisite) in blocked {
                let attempt = state.task(task_uuid)?.attempt;
                let failure = ancestor_failure(prerequisite, attempt, now);
                cancelled.push(state.cancel_not_started(
                    task_uuid,
                    TaskEvent::AncestorFailed,
                    Some(failure),
                    now,
                )?);
            }
        }
        Ok(cancelled)
    }

    async fn find_expired(&self, now: DateTime<Utc>, grace: Duration) -> Result<Vec<Task>> {
        let grace = chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::zero());
        let state = self.state.lock();
        Ok(state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .filter(|t| t.deadline_at.is_some_and(|d| d + grace < now))
            .cloned()
            .collect())
    }

    async fn running_count(&self, tenant_id: &str) -> Result<usize> {
        Ok(self.state.lock().running_count(tenant_id))
    }
}
