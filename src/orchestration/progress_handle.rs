//! Handle through which a running attempt reports progress and observes
//! cancellation.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::database::TaskStore;
use crate::error::{OrchestratorError, Result};
use crate::events::{ProgressBroadcaster, ProgressEventKind};
use crate::models::ClaimToken;

#[derive(Clone)]
pub struct ProgressHandle {
    token: ClaimToken,
    tenant_id: String,
    store: Arc<dyn TaskStore>,
    broadcaster: ProgressBroadcaster,
    last_percent: Arc<AtomicU8>,
    cancel: watch::Receiver<bool>,
}

impl std::fmt::Debug for ProgressHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressHandle")
            .field("token", &self.token)
            .field("last_percent", &self.last_percent.load(Ordering::Relaxed))
            .field("cancelled", &*self.cancel.borrow())
            .finish()
    }
}

impl ProgressHandle {
    pub fn new(
        token: ClaimToken,
        tenant_id: impl Into<String>,
        store: Arc<dyn TaskStore>,
        broadcaster: ProgressBroadcaster,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            token,
            tenant_id: tenant_id.into(),
            store,
            broadcaster,
            last_percent: Arc::new(AtomicU8::new(0)),
            cancel,
        }
    }

    pub fn task_uuid(&self) -> Uuid {
        self.token.task_uuid
    }

    pub fn attempt(&self) -> u32 {
        self.token.attempt
    }

    pub fn percent(&self) -> u8 {
        self.last_percent.load(Ordering::Acquire)
    }

    /// Report progress for the current attempt.
    ///
    /// Values below the last reported percentage are dropped. Fails with
    /// `CANCELLED` when this attempt no longer holds the claim.
    pub async fn report(&self, percent: u8, message: Option<&str>) -> Result<()> {
        let percent = percent.min(100);
        let previous = self.last_percent.fetch_max(percent, Ordering::AcqRel);
        if percent < previous {
            debug!(task_uuid = %self.token.task_uuid, percent, previous, "Ignoring progress regression");
            return Ok(());
        }

        if !self.store.update_progress(&self.token, percent).await? {
            return Err(OrchestratorError::cancelled(format!(
                "attempt {} of task {} no longer holds its claim",
                self.token.attempt, self.token.task_uuid
            )));
        }

        self.broadcaster.publish(
            &self.tenant_id,
            self.token.task_uuid,
            self.token.attempt,
            ProgressEventKind::Progress {
                percent,
                message: message.map(str::to_string),
            },
        );
        Ok(())
    }

    /// Whether cancellation of the task has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// `CANCELLED` error once cancellation was requested, for `?` at safe points
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(OrchestratorError::cancelled(format!(
                "task {} was cancelled",
                self.token.task_uuid
            )));
        }
        Ok(())
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        if cancel.wait_for(|requested| *requested).await.is_err() {
            // Sender gone without a request: never resolves
            std::future::pending::<()>().await;
        }
    }
}
