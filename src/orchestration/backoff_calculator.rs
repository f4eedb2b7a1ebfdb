//! # Retry/Backoff Engine
//!
//! Decides what happens to a failed attempt:
//!
//! - non-retryable error kinds (validation, authorization, terminal) dead-letter
//!   immediately, whatever attempts remain
//! - otherwise the task retries while `attempt < max_attempts`, with
//!   `ready_at = now + min(max(base * multiplier^(attempt - 1), retry_after), cap) + jitter`
//! - exhausted tasks dead-letter
//!
//! `attempt` is incremented at claim time, so the first failure (attempt 1) waits
//! the base delay.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

use crate::error::OrchestratorError;
use crate::models::{BackoffPolicy, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    NonRetryable,
    AttemptsExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        delay: Duration,
        ready_at: DateTime<Utc>,
    },
    DeadLetter(DeadLetterReason),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryEngine;

impl RetryEngine {
    pub fn new() -> Self {
        Self
    }

    /// Deterministic delay after `failed_attempt` (1-based), before jitter
    pub fn base_delay(
        &self,
        policy: &BackoffPolicy,
        failed_attempt: u32,
        retry_after: Option<Duration>,
    ) -> Duration {
        let computed = policy.base_delay(failed_attempt.saturating_sub(1));
        let requested = retry_after.map_or(computed, |server| computed.max(server));
        requested.min(policy.cap())
    }

    pub fn delay_for(
        &self,
        policy: &BackoffPolicy,
        failed_attempt: u32,
        retry_after: Option<Duration>,
    ) -> Duration {
        let delay = self.base_delay(policy, failed_attempt, retry_after);
        if policy.jitter_ms == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=policy.jitter_ms);
        delay + Duration::from_millis(jitter)
    }

    pub fn decide(&self, task: &Task, error: &OrchestratorError, now: DateTime<Utc>) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::DeadLetter(DeadLetterReason::NonRetryable);
        }
        if !task.attempts_remaining() {
            return RetryDecision::DeadLetter(DeadLetterReason::AttemptsExhausted);
        }
        let delay = self.delay_for(&task.backoff_policy, task.attempt, error.retry_after());
        let ready_at = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        RetryDecision::Retry { delay, ready_at }
    }
}
