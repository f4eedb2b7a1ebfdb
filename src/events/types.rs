use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::TaskFailure;
use crate::state_machine::TaskStatus;

/// What happened to a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEventKind {
    /// The task entered `status`
    Lifecycle { status: TaskStatus },
    /// The running attempt reported progress
    Progress {
        percent: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The attempt failed; `will_retry` tells whether another attempt is scheduled
    Failed { error: TaskFailure, will_retry: bool },
}

/// Event delivered to progress subscribers.
///
/// `sequence` is unique per publishing replica and strictly increasing within it;
/// across replicas it follows wall-clock order. Subscribers drop redelivered events
/// by `(task_uuid, sequence)`. See [`ProgressBroadcaster`](super::ProgressBroadcaster).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub tenant_id: String,
    pub task_uuid: Uuid,
    pub attempt: u32,
    pub sequence: u64,
    #[serde(flatten)]
    pub kind: ProgressEventKind,
    pub published_at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ProgressEventKind::Lifecycle { status } if status.is_terminal())
    }

    /// Reported percentage, for progress events
    pub fn percent(&self) -> Option<u8> {
        match self.kind {
            ProgressEventKind::Progress { percent, .. } => Some(percent),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<TaskStatus> {
        match self.kind {
            ProgressEventKind::Lifecycle { status } => Some(status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_flat() {
        let event = ProgressEvent {
            tenant_id: "acme".to_string(),
            task_uuid: Uuid::now_v7(),
            attempt: 2,
            sequence: 7,
            kind: ProgressEventKind::Progress {
                percent: 40,
                message: Some("synced 2/5 resources".to_string()),
            },
            published_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "progress");
        assert_eq!(json["percent"], 40);
        assert_eq!(json["sequence"], 7);
        assert_eq!(event.percent(), Some(40));
        assert!(!event.is_terminal());
    }
}
