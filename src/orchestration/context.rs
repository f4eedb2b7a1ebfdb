//! # Orchestrator Context
//!
//! Explicitly constructed bundle of the shared handles every orchestration
//! component needs. Built once at startup and cloned into the scheduler, its
//! workers and the public API; there is no ambient global state.

use std::sync::Arc;
use tokio::sync::Notify;

use super::backoff_calculator::RetryEngine;
use crate::audit::AuditLogger;
use crate::collaborators::Collaborators;
use crate::config::OrchestratorConfig;
use crate::database::{InMemoryTaskStore, TaskStore};
use crate::events::ProgressBroadcaster;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct OrchestratorContext {
    pub config: Arc<OrchestratorConfig>,
    pub store: Arc<dyn TaskStore>,
    pub audit: Arc<AuditLogger>,
    pub progress: ProgressBroadcaster,
    pub rate_limiter: RateLimiter,
    pub collaborators: Collaborators,
    pub retry: RetryEngine,
    /// Wakes the scheduler after enqueue, completion and cancellation
    pub wake: Arc<Notify>,
}

impl std::fmt::Debug for OrchestratorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorContext")
            .field("progress", &self.progress)
            .field("rate_limiter", &self.rate_limiter)
            .field("collaborators", &self.collaborators)
            .finish_non_exhaustive()
    }
}

impl OrchestratorContext {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn TaskStore>,
        audit: Arc<AuditLogger>,
        collaborators: Collaborators,
    ) -> Self {
        let progress = ProgressBroadcaster::new(config.progress.channel_capacity);
        let rate_limiter = RateLimiter::in_memory(config.rate_limit.clone());
        Self {
            config: Arc::new(config),
            store,
            audit,
            progress,
            rate_limiter,
            collaborators,
            retry: RetryEngine::new(),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Context backed entirely by process-local stores
    pub fn in_memory(config: OrchestratorConfig, collaborators: Collaborators) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(AuditLogger::in_memory()),
            collaborators,
        )
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBroadcaster) -> Self {
        self.progress = progress;
        self
    }
}
