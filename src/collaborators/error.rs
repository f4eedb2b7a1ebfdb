use std::time::Duration;
use thiserror::Error;

use crate::error::{ErrorKind, OrchestratorError};

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Failure reported by an external collaborator client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    /// No client or credentials are configured for the service
    #[error("{service} is not configured")]
    NotConfigured { service: String },

    #[error("{service} unavailable: {reason}")]
    Unavailable {
        service: String,
        reason: String,
        /// Server-requested delay before the next call
        retry_after: Option<Duration>,
    },

    #[error("timed out: {0}")]
    Timeout(String),

    /// Concurrent modification; retrying after a fresh read may succeed
    #[error("conflict: {0}")]
    Conflict(String),

    /// The service refused the request as invalid
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl CollaboratorError {
    pub fn unavailable(service: &str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.to_string(),
            reason: reason.into(),
            retry_after: None,
        }
    }
}

impl From<CollaboratorError> for OrchestratorError {
    fn from(error: CollaboratorError) -> Self {
        match error {
            CollaboratorError::NotConfigured { service } => OrchestratorError::not_configured(&service),
            CollaboratorError::Unavailable {
                service,
                reason,
                retry_after,
            } => {
                let err = OrchestratorError::call_failed(&service, reason);
                match retry_after {
                    Some(delay) => err.with_details(serde_json::json!({
                        "service": service,
                        "retry_after_ms": delay.as_millis() as u64,
                    })),
                    None => err,
                }
            }
            CollaboratorError::Timeout(message) => {
                OrchestratorError::transient(format!("collaborator timed out: {message}"))
            }
            CollaboratorError::Conflict(message) => {
                OrchestratorError::transient(format!("conflict: {message}"))
            }
            CollaboratorError::Rejected(message) => OrchestratorError::validation(message),
            CollaboratorError::PermissionDenied(message) => OrchestratorError::forbidden(message),
            CollaboratorError::NotFound(what) => OrchestratorError::new(ErrorKind::NotFound, what),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorFault;

    #[test]
    fn test_error_kind_mapping() {
        let cases = [
            (
                CollaboratorError::NotConfigured {
                    service: "deployment sync".into(),
                },
                ErrorKind::CollaboratorUnavailable(CollaboratorFault::NotConfigured),
            ),
            (
                CollaboratorError::unavailable("deployment sync", "502 bad gateway"),
                ErrorKind::CollaboratorUnavailable(CollaboratorFault::CallFailed),
            ),
            (CollaboratorError::Timeout("sync".into()), ErrorKind::TransientExecutionFailure),
            (CollaboratorError::Conflict("sha mismatch".into()), ErrorKind::TransientExecutionFailure),
            (CollaboratorError::Rejected("bad ref".into()), ErrorKind::ValidationFailure),
            (CollaboratorError::PermissionDenied("token scope".into()), ErrorKind::AuthorizationFailure),
            (CollaboratorError::NotFound("app billing".into()), ErrorKind::NotFound),
        ];
        for (error, kind) in cases {
            assert_eq!(OrchestratorError::from(error).kind, kind);
        }
    }

    #[test]
    fn test_retry_after_is_carried() {
        let err: OrchestratorError = CollaboratorError::Unavailable {
            service: "source control".into(),
            reason: "secondary rate limit".into(),
            retry_after: Some(Duration::from_secs(30)),
        }
        .into();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert!(err.is_retryable());
    }
}
