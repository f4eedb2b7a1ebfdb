//! Error types for the orchestrator.
//!
//! Every failure is an [`OrchestratorError`] tagged with an [`ErrorKind`]. Callers
//! (the scheduler, the retry engine, the synchronous gateway) dispatch on the kind,
//! never on the concrete source of the error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Distinguishes a collaborator that is not wired up at all from one that failed a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorFault {
    NotConfigured,
    CallFailed,
}

/// Error taxonomy shared by the synchronous and asynchronous paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fault", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input. Never retried, surfaced immediately.
    ValidationFailure,
    /// Role or tenant mismatch. Never retried.
    AuthorizationFailure,
    /// External service down or misconfigured. Retryable.
    CollaboratorUnavailable(CollaboratorFault),
    /// Timeouts, conflicts. Retryable.
    TransientExecutionFailure,
    /// Unrecoverable state. Dead-lettered without further attempts.
    TerminalExecutionFailure,
    /// Admission rejected by the rate limiter.
    RateLimited,
    NotFound,
    /// Cooperative abort after a cancellation request.
    Cancelled,
    /// Datastore failure.
    Storage,
    Configuration,
}

impl ErrorKind {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailure => "VALIDATION_FAILED",
            Self::AuthorizationFailure => "FORBIDDEN",
            Self::CollaboratorUnavailable(CollaboratorFault::NotConfigured) => {
                "COLLABORATOR_NOT_CONFIGURED"
            }
            Self::CollaboratorUnavailable(CollaboratorFault::CallFailed) => {
                "COLLABORATOR_CALL_FAILED"
            }
            Self::TransientExecutionFailure => "TRANSIENT_FAILURE",
            Self::TerminalExecutionFailure => "TERMINAL_FAILURE",
            Self::RateLimited => "RATE_LIMITED",
            Self::NotFound => "NOT_FOUND",
            Self::Cancelled => "CANCELLED",
            Self::Storage => "STORAGE_ERROR",
            Self::Configuration => "CONFIGURATION_ERROR",
        }
    }

    /// HTTP-equivalent status for the synchronous API boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ValidationFailure => 400,
            Self::AuthorizationFailure => 403,
            Self::CollaboratorUnavailable(_) => 503,
            Self::TransientExecutionFailure => 500,
            Self::TerminalExecutionFailure => 500,
            Self::RateLimited => 429,
            Self::NotFound => 404,
            Self::Cancelled => 409,
            Self::Storage => 500,
            Self::Configuration => 500,
        }
    }

    /// Whether a task failing with this kind may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CollaboratorUnavailable(_) | Self::TransientExecutionFailure | Self::Storage
        )
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "VALIDATION_FAILED" => Self::ValidationFailure,
            "FORBIDDEN" => Self::AuthorizationFailure,
            "COLLABORATOR_NOT_CONFIGURED" => {
                Self::CollaboratorUnavailable(CollaboratorFault::NotConfigured)
            }
            "COLLABORATOR_CALL_FAILED" => {
                Self::CollaboratorUnavailable(CollaboratorFault::CallFailed)
            }
            "TRANSIENT_FAILURE" => Self::TransientExecutionFailure,
            "TERMINAL_FAILURE" => Self::TerminalExecutionFailure,
            "RATE_LIMITED" => Self::RateLimited,
            "NOT_FOUND" => Self::NotFound,
            "CANCELLED" => Self::Cancelled,
            "STORAGE_ERROR" => Self::Storage,
            "CONFIGURATION_ERROR" => Self::Configuration,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct OrchestratorError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<Value>,
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailure, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthorizationFailure, message)
    }

    pub fn not_configured(service: &str) -> Self {
        Self::new(
            ErrorKind::CollaboratorUnavailable(CollaboratorFault::NotConfigured),
            format!("{service} is not configured"),
        )
        .with_details(serde_json::json!({ "service": service }))
    }

    pub fn call_failed(service: &str, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::CollaboratorUnavailable(CollaboratorFault::CallFailed),
            format!("{service} call failed: {}", reason.into()),
        )
        .with_details(serde_json::json!({ "service": service }))
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientExecutionFailure, message)
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TerminalExecutionFailure, message)
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, format!("{} not found", what.into()))
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn rate_limited(profile: &str, retry_after: Duration, reset_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self::new(
            ErrorKind::RateLimited,
            format!(
                "rate limit exceeded for '{profile}', retry after {}s",
                retry_after.as_secs().max(1)
            ),
        )
        .with_details(serde_json::json!({
            "profile": profile,
            "retry_after_ms": retry_after.as_millis() as u64,
            "reset_at": reset_at,
        }))
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Server-requested delay carried in `details.retry_after_ms`, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        self.details
            .as_ref()
            .and_then(|d| d.get("retry_after_ms"))
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse::from(self)
    }
}

/// Structured error body returned by synchronous API calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip)]
    pub status: u16,
}

impl From<&OrchestratorError> for ErrorResponse {
    fn from(error: &OrchestratorError) -> Self {
        Self {
            code: error.kind.code().to_string(),
            message: error.message.clone(),
            details: error.details.clone(),
            status: error.kind.http_status(),
        }
    }
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => OrchestratorError::not_found("row"),
            other => OrchestratorError::storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(error: serde_json::Error) -> Self {
        OrchestratorError::validation(format!("JSON serialization error: {error}"))
    }
}

impl From<config::ConfigError> for OrchestratorError {
    fn from(error: config::ConfigError) -> Self {
        OrchestratorError::configuration(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(OrchestratorError::transient("timeout").is_retryable());
        assert!(OrchestratorError::not_configured("deployment sync").is_retryable());
        assert!(OrchestratorError::call_failed("source control", "502").is_retryable());
        assert!(!OrchestratorError::validation("bad").is_retryable());
        assert!(!OrchestratorError::forbidden("nope").is_retryable());
        assert!(!OrchestratorError::terminal("broken").is_retryable());
    }

    #[test]
    fn test_collaborator_faults_have_distinct_codes() {
        let missing = OrchestratorError::not_configured("object storage");
        let failed = OrchestratorError::call_failed("object storage", "connection reset");
        assert_eq!(missing.code(), "COLLABORATOR_NOT_CONFIGURED");
        assert_eq!(failed.code(), "COLLABORATOR_CALL_FAILED");
        assert_eq!(missing.kind.http_status(), 503);
    }

    #[test]
    fn test_code_round_trip() {
        for kind in [
            ErrorKind::ValidationFailure,
            ErrorKind::CollaboratorUnavailable(CollaboratorFault::CallFailed),
            ErrorKind::RateLimited,
            ErrorKind::Cancelled,
        ] {
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code("nonsense"), None);
    }

    #[test]
    fn test_error_response_body() {
        let err = OrchestratorError::forbidden("role USER below READWRITE");
        let body = err.to_response();
        assert_eq!(body.code, "FORBIDDEN");
        assert_eq!(body.status, 403);

        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("status").is_none());
        assert_eq!(json["message"], "role USER below READWRITE");
    }

    #[test]
    fn test_retry_after_details() {
        let err = OrchestratorError::transient("throttled")
            .with_details(serde_json::json!({ "retry_after_ms": 1500 }));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1500)));
        assert_eq!(OrchestratorError::transient("x").retry_after(), None);
    }
}
