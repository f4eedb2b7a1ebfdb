use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{OrchestratorError, Result};

/// Per-task retry delay rule: `min(base * multiplier^n, cap) + jitter`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry, in milliseconds
    pub base_ms: u64,
    /// Growth factor applied per failed attempt
    pub multiplier: f64,
    /// Upper bound of the uniformly random jitter added to each delay
    pub jitter_ms: u64,
    /// Maximum delay before jitter
    pub cap_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            multiplier: 2.0,
            jitter_ms: 250,
            cap_ms: 300_000,
        }
    }
}

impl BackoffPolicy {
    pub fn without_jitter(mut self) -> Self {
        self.jitter_ms = 0;
        self
    }

    /// Deterministic part of the delay after `prior_failures` earlier failures
    /// (0 for the first retry).
    pub fn base_delay(&self, prior_failures: u32) -> Duration {
        let exponent = i32::try_from(prior_failures).unwrap_or(i32::MAX);
        let raw = self.base_ms as f64 * self.multiplier.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.cap_ms as f64)
        } else {
            self.cap_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_ms == 0 {
            return Err(OrchestratorError::validation(
                "backoff base delay must be positive",
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(OrchestratorError::validation(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.cap_ms < self.base_ms {
            return Err(OrchestratorError::validation(format!(
                "backoff cap ({}ms) must not be below base ({}ms)",
                self.cap_ms, self.base_ms
            )));
        }
        Ok(())
    }
}
