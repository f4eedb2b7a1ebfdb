//! # Scheduler
//!
//! Drives tasks from `Pending` to a terminal state on this replica.
//!
//! ## Tick
//!
//! Each tick, triggered by the poll interval or a wake signal:
//!
//! 1. promotes `Pending` tasks whose prerequisites succeeded to `Ready`
//! 2. sweeps not-started tasks whose prerequisites ended unsuccessfully
//! 3. every reaper interval, fails attempts whose deadline plus grace has passed
//!    (their replica is presumed dead) through the retry engine
//! 4. claims work round-robin across tenants, one claim per tenant per round,
//!    while worker permits remain. Each round starts after the tenant that was
//!    served last, so the rotation carries over between ticks.
//!
//! A tenant at its concurrency cap simply yields nothing in a round, so a busy
//! tenant cannot starve the others. Every claim is an atomic store operation;
//! nothing here assumes it is the only replica.
//!
//! ## Attempts
//!
//! Each claimed attempt runs on its own Tokio task holding a worker permit, under
//! `tokio::time::timeout(max_duration)`. A companion poller checks the durable
//! cancel flag so a cancel requested on another replica reaches the executor
//! through its [`ProgressHandle`].

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use super::context::OrchestratorContext;
use super::lifecycle::TaskLifecycle;
use super::progress_handle::ProgressHandle;
use super::task_executor::{ExecutionContext, ExecutorRegistry};
use crate::database::ClaimRequest;
use crate::error::{OrchestratorError, Result};
use crate::logging::log_error;
use crate::models::Task;

#[derive(Clone)]
pub struct Scheduler {
    ctx: OrchestratorContext,
    registry: Arc<ExecutorRegistry>,
    lifecycle: TaskLifecycle,
    worker_id: String,
    pool_size: usize,
    permits: Arc<Semaphore>,
    /// Cancel signal of every attempt running on this replica
    running: Arc<DashMap<Uuid, watch::Sender<bool>>>,
    last_reap: Arc<Mutex<Option<Instant>>>,
    /// Tenant that received the most recent claim; the next round starts after it
    last_served: Arc<Mutex<Option<String>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("worker_id", &self.worker_id)
            .field("pool_size", &self.pool_size)
            .field("in_flight", &self.running.len())
            .finish()
    }
}

impl Scheduler {
    pub fn new(ctx: OrchestratorContext, registry: Arc<ExecutorRegistry>, worker_id: impl Into<String>) -> Self {
        let pool_size = ctx.config.scheduler.worker_pool_size.max(1);
        Self {
            lifecycle: TaskLifecycle::new(ctx.clone()),
            ctx,
            registry,
            worker_id: worker_id.into(),
            pool_size,
            permits: Arc::new(Semaphore::new(pool_size)),
            running: Arc::new(DashMap::new()),
            last_reap: Arc::new(Mutex::new(None)),
            last_served: Arc::new(Mutex::new(None)),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Attempts currently executing on this replica
    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    /// Signal a locally running attempt that its task was cancelled.
    /// Returns false when the task is not running here.
    pub fn signal_cancel(&self, task_uuid: Uuid) -> bool {
        match self.running.get(&task_uuid) {
            Some(sender) => {
                sender.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Scheduler loop; returns once `shutdown` turns true or its sender is dropped.
    #[instrument(skip(self, shutdown), fields(worker_id = %self.worker_id))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut poll = tokio::time::interval(self.ctx.config.scheduler.poll_interval());
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(pool_size = self.pool_size, task_types = ?self.registry.task_types(), "🚀 Scheduler started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = poll.tick() => {}
                _ = self.ctx.wake.notified() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.tick().await {
                log_error("scheduler", "tick", &e.to_string(), Some(&self.worker_id));
            }
        }

        info!(in_flight = self.in_flight(), "🛑 Scheduler stopped claiming");
    }

    /// One scheduling pass. Returns the number of attempts started.
    pub async fn tick(&self) -> Result<usize> {
        let now = Utc::now();

        for task in self.ctx.store.promote_ready(now).await? {
            self.lifecycle.promoted(&task).await;
        }
        for task in self.ctx.store.cancel_blocked(now).await? {
            self.lifecycle.cancelled_by_ancestor(&task).await;
        }

        let reap_due = {
            let mut last = self.last_reap.lock();
            let due = last.map_or(true, |at| at.elapsed() >= self.ctx.config.scheduler.reaper_interval());
            if due {
                *last = Some(Instant::now());
            }
            due
        };
        if reap_due {
            self.reap_expired().await?;
        }

        self.claim_round().await
    }

    /// Fail attempts whose deadline plus grace has passed
    pub async fn reap_expired(&self) -> Result<usize> {
        let grace = self.ctx.config.scheduler.deadline_grace();
        let expired = self.ctx.store.find_expired(Utc::now(), grace).await?;
        let mut reaped = 0;
        for task in expired {
            let Some(token) = task.claim_token() else {
                continue;
            };
            warn!(
                task_uuid = %task.task_uuid,
                attempt = task.attempt,
                claimed_by = ?task.claimed_by,
                "⏰ Reaping attempt past its deadline"
            );
            let error = OrchestratorError::transient(format!(
                "attempt {} exceeded its deadline; claim presumed lost",
                task.attempt
            ));
            if self
                .lifecycle
                .complete_attempt(&task, &token, Err(error), false)
                .await?
                .is_some()
            {
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn claim_round(&self) -> Result<usize> {
        if self.registry.is_empty() {
            return Ok(0);
        }
        let executable = self.registry.executable();
        let mut started = 0;

        loop {
            let tenants = self.ctx.store.tenants_with_ready_work(Utc::now()).await?;
            let tenants = rotate_after(tenants, self.last_served.lock().as_deref());
            let mut claimed_this_round = false;

            for tenant_id in tenants {
                let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                    debug!("Worker pool saturated");
                    return Ok(started);
                };
                let request = ClaimRequest {
                    tenant_cap: self.ctx.config.scheduler.tenant_cap(&tenant_id),
                    tenant_id,
                    worker_id: self.worker_id.clone(),
                    executable: executable.clone(),
                    now: Utc::now(),
                };
                if let Some(task) = self.ctx.store.claim_next(&request).await? {
                    *self.last_served.lock() = Some(request.tenant_id);
                    self.spawn_attempt(task, permit).await;
                    started += 1;
                    claimed_this_round = true;
                }
            }

            if !claimed_this_round {
                return Ok(started);
            }
        }
    }

    async fn spawn_attempt(&self, task: Task, permit: OwnedSemaphorePermit) {
        let (cancel_tx, cancel_rx) = watch::channel(task.cancel_requested);
        self.running.insert(task.task_uuid, cancel_tx);
        self.lifecycle.claimed(&task).await;

        let span = info_span!("task_attempt", task_uuid = %task.task_uuid, attempt = task.attempt);
        let scheduler = self.clone();
        tokio::spawn(
            async move {
                let task_uuid = task.task_uuid;
                if let Err(e) = scheduler.execute_attempt(task, cancel_rx).await {
                    log_error(
                        "scheduler",
                        "complete_attempt",
                        &e.to_string(),
                        Some(&task_uuid.to_string()),
                    );
                }
                scheduler.running.remove(&task_uuid);
                drop(permit);
                scheduler.ctx.wake.notify_one();
            }
            .instrument(span),
        );
    }

    async fn execute_attempt(&self, task: Task, cancel: watch::Receiver<bool>) -> Result<()> {
        let Some(token) = task.claim_token() else {
            return Ok(());
        };
        let handle = ProgressHandle::new(
            token.clone(),
            task.tenant_id.clone(),
            self.ctx.store.clone(),
            self.ctx.progress.clone(),
            cancel,
        );
        let poller = self.spawn_cancel_poller(task.task_uuid);
        let max_duration = self.registry.max_duration(task.task_type);

        let outcome = match self.registry.get(task.task_type) {
            Some(executor) => {
                let exec_ctx = ExecutionContext::new(
                    task.clone(),
                    self.ctx.collaborators.clone(),
                    self.ctx.audit.clone(),
                );
                match tokio::time::timeout(max_duration, executor.execute(&exec_ctx, &handle)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(OrchestratorError::transient(format!(
                        "attempt exceeded maximum duration of {}s",
                        max_duration.as_secs()
                    ))
                    .with_details(serde_json::json!({
                        "timeout_ms": max_duration.as_millis() as u64,
                    }))),
                }
            }
            None => Err(OrchestratorError::terminal(format!(
                "no executor registered for {}",
                task.task_type
            ))),
        };
        poller.abort();

        if let Err(e) = &outcome {
            debug!(code = e.code(), error = %e, "Attempt failed");
        }
        self.lifecycle
            .complete_attempt(&task, &token, outcome, handle.is_cancelled())
            .await?;
        Ok(())
    }

    fn spawn_cancel_poller(&self, task_uuid: Uuid) -> tokio::task::JoinHandle<()> {
        let store = self.ctx.store.clone();
        let running = self.running.clone();
        let interval = self.ctx.config.scheduler.cancel_poll_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.is_cancel_requested(task_uuid).await {
                    Ok(true) => {
                        if let Some(sender) = running.get(&task_uuid) {
                            sender.send_replace(true);
                        }
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => debug!(task_uuid = %task_uuid, error = %e, "Cancel poll failed"),
                }
            }
        })
    }

    /// Wait until every in-flight attempt has finished. False on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let all = u32::try_from(self.pool_size).unwrap_or(u32::MAX);
        matches!(
            tokio::time::timeout(timeout, self.permits.acquire_many(all)).await,
            Ok(Ok(_))
        )
    }
}

/// Sorted tenants reordered to start just after `last_served`, wrapping around.
///
/// Rounds otherwise always begin with the same tenant, and when the worker pool is
/// smaller than the sum of tenant caps the tenants sorting first take every permit.
fn rotate_after(mut tenants: Vec<String>, last_served: Option<&str>) -> Vec<String> {
    if let Some(last) = last_served {
        let start = tenants.partition_point(|t| t.as_str() <= last);
        tenants.rotate_left(start);
    }
    tenants
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenants(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_rotation_starts_after_last_served() {
        let all = tenants(&["acme", "globex", "initech"]);
        assert_eq!(rotate_after(all.clone(), None), all);
        assert_eq!(
            rotate_after(all.clone(), Some("acme")),
            tenants(&["globex", "initech", "acme"])
        );
        assert_eq!(rotate_after(all.clone(), Some("initech")), all);
        // The last served tenant may have no work left this round
        assert_eq!(
            rotate_after(tenants(&["acme", "initech"]), Some("globex")),
            tenants(&["initech", "acme"])
        );
    }
}
