use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;
use uuid::Uuid;

use super::types::ProgressEvent;

/// Receiver side of [`ProgressBroadcaster::subscribe`](super::ProgressBroadcaster::subscribe).
///
/// Only events of the subscribed tenant (and task, if given) are yielded. A
/// subscriber that falls behind the channel capacity skips the missed events and
/// resumes with the oldest retained one.
#[derive(Debug)]
pub struct ProgressSubscription {
    receiver: broadcast::Receiver<ProgressEvent>,
    tenant_id: String,
    task_uuid: Option<Uuid>,
}

impl ProgressSubscription {
    pub(crate) fn new(
        receiver: broadcast::Receiver<ProgressEvent>,
        tenant_id: String,
        task_uuid: Option<Uuid>,
    ) -> Self {
        Self {
            receiver,
            tenant_id,
            task_uuid,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn task_uuid(&self) -> Option<Uuid> {
        self.task_uuid
    }

    fn matches(&self, event: &ProgressEvent) -> bool {
        event.tenant_id == self.tenant_id && self.task_uuid.map_or(true, |t| t == event.task_uuid)
    }

    /// Next matching event; `None` once the broadcaster is gone
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(tenant_id = %self.tenant_id, skipped, "Progress subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already buffered, without waiting
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(tenant_id = %self.tenant_id, skipped, "Progress subscriber lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|event| (event, subscription))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ProgressBroadcaster, ProgressEventKind};
    use futures::StreamExt;
    use uuid::Uuid;

    fn progress(percent: u8) -> ProgressEventKind {
        ProgressEventKind::Progress {
            percent,
            message: None,
        }
    }

    #[tokio::test]
    async fn test_filters_by_tenant_and_task() {
        let broadcaster = ProgressBroadcaster::new(16);
        let watched = Uuid::now_v7();
        let other = Uuid::now_v7();
        let mut by_task = broadcaster.subscribe("acme", Some(watched));
        let mut by_tenant = broadcaster.subscribe("acme", None);

        broadcaster.publish("globex", watched, 1, progress(5));
        broadcaster.publish("acme", other, 1, progress(10));
        broadcaster.publish("acme", watched, 1, progress(20));

        assert_eq!(by_task.recv().await.unwrap().percent(), Some(20));
        assert!(by_task.try_recv().is_none());

        assert_eq!(by_tenant.recv().await.unwrap().task_uuid, other);
        assert_eq!(by_tenant.recv().await.unwrap().task_uuid, watched);
    }

    #[test]
    fn test_recv_waits_for_matching_event() {
        let broadcaster = ProgressBroadcaster::new(8);
        let task = Uuid::now_v7();
        let mut subscription = broadcaster.subscribe("acme", Some(task));

        let mut next = tokio_test::task::spawn(subscription.recv());
        tokio_test::assert_pending!(next.poll());

        broadcaster.publish("acme", Uuid::now_v7(), 1, progress(10));
        tokio_test::assert_pending!(next.poll());

        broadcaster.publish("acme", task, 1, progress(60));
        assert!(next.is_woken());
        let event = tokio_test::assert_ready!(next.poll()).unwrap();
        assert_eq!(event.percent(), Some(60));
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_ahead() {
        let broadcaster = ProgressBroadcaster::new(2);
        let task = Uuid::now_v7();
        let mut subscription = broadcaster.subscribe("acme", Some(task));

        for pct in [10, 20, 30, 40] {
            broadcaster.publish("acme", task, 1, progress(pct));
        }

        let first = subscription.recv().await.unwrap();
        assert_eq!(first.percent(), Some(30));
        let second = subscription.recv().await.unwrap();
        assert_eq!(second.percent(), Some(40));
        assert!(second.sequence > first.sequence);
    }

    #[tokio::test]
    async fn test_stream_ends_when_broadcaster_dropped() {
        let broadcaster = ProgressBroadcaster::new(8);
        let task = Uuid::now_v7();
        let stream = broadcaster.subscribe("acme", Some(task)).into_stream();

        broadcaster.publish("acme", task, 1, progress(50));
        broadcaster.publish("acme", task, 1, progress(100));
        drop(broadcaster);

        let percents: Vec<_> = stream.filter_map(|e| async move { e.percent() }).collect().await;
        assert_eq!(percents, vec![50, 100]);
    }
}
