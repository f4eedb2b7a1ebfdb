use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::subscription::ProgressSubscription;
use super::types::{ProgressEvent, ProgressEventKind};
use crate::constants::system;
use crate::error::Result;

/// External delivery target for progress events (pub/sub topic, socket hub, ...).
#[async_trait]
pub trait ProgressSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &ProgressEvent) -> Result<()>;
}

/// Low bits of every sequence number identify the publishing broadcaster
pub const SEQUENCE_ORIGIN_BITS: u32 = 10;

const ORIGIN_MASK: u64 = (1 << SEQUENCE_ORIGIN_BITS) - 1;

/// Fan-out of task lifecycle and progress events.
///
/// Publishing never blocks and never fails: events go to an in-process broadcast
/// channel and to one ordered forwarding queue per registered [`ProgressSink`].
///
/// Sequence numbers are `(micros << SEQUENCE_ORIGIN_BITS) | origin`, where
/// `micros` is a wall-clock microsecond reading bumped to stay strictly increasing
/// within this broadcaster and `origin` is chosen at random per broadcaster. Events
/// of one task published by different replicas therefore carry distinct sequences
/// that follow wall-clock order, and no per-task state is kept.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: broadcast::Sender<ProgressEvent>,
    origin: u64,
    /// Last microsecond reading handed out
    clock: Arc<Mutex<u64>>,
    sinks: Arc<RwLock<Vec<mpsc::UnboundedSender<ProgressEvent>>>>,
}

impl std::fmt::Debug for ProgressBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressBroadcaster")
            .field("origin", &self.origin)
            .field("subscribers", &self.sender.receiver_count())
            .field("sinks", &self.sinks.read().len())
            .finish()
    }
}

impl ProgressBroadcaster {
    /// Create a broadcaster buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        Self::with_origin(capacity, rand::thread_rng().gen_range(0..=ORIGIN_MASK))
    }

    /// Broadcaster with a fixed origin tag; only the low `SEQUENCE_ORIGIN_BITS` are used
    pub fn with_origin(capacity: usize, origin: u64) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            origin: origin & ORIGIN_MASK,
            clock: Arc::new(Mutex::new(0)),
            sinks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn origin(&self) -> u64 {
        self.origin
    }

    /// Register an external sink. Must be called inside a Tokio runtime.
    pub fn add_sink(&self, sink: Arc<dyn ProgressSink>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.deliver(&event).await {
                    warn!(
                        sink = sink.name(),
                        task_uuid = %event.task_uuid,
                        sequence = event.sequence,
                        error = %e,
                        "Progress sink delivery failed"
                    );
                }
            }
        });
        self.sinks.write().push(tx);
    }

    /// Publish an event for a task, assigning its next sequence number
    pub fn publish(
        &self,
        tenant_id: &str,
        task_uuid: Uuid,
        attempt: u32,
        kind: ProgressEventKind,
    ) -> ProgressEvent {
        let event = {
            // Holding the clock keeps sequence assignment and channel order in step
            let mut last = self.clock.lock();
            let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0);
            *last = now.max(*last + 1);
            let event = ProgressEvent {
                tenant_id: tenant_id.to_string(),
                task_uuid,
                attempt,
                sequence: (*last << SEQUENCE_ORIGIN_BITS) | self.origin,
                kind,
                published_at: Utc::now(),
            };
            // No subscribers is not an error
            let _ = self.sender.send(event.clone());
            self.sinks.write().retain(|sink| sink.send(event.clone()).is_ok());
            event
        };

        debug!(
            task_uuid = %task_uuid,
            sequence = event.sequence,
            "📡 Progress event published"
        );
        event
    }

    /// Events of one tenant, optionally narrowed to a single task
    pub fn subscribe(&self, tenant_id: impl Into<String>, task_uuid: Option<Uuid>) -> ProgressSubscription {
        ProgressSubscription::new(self.sender.subscribe(), tenant_id.into(), task_uuid)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(system::DEFAULT_PROGRESS_CHANNEL_CAPACITY)
    }
}
