//! # Rate Limiter
//!
//! Fixed-window admission control per `(profile, identifier)`. Consulted at the
//! synchronous API boundary and before task admission.
//!
//! A request is rejected once `count >= limit` inside the active window; the
//! rejection carries the window's reset time so callers can compute a retry delay.
//!
//! ## Store outages
//!
//! When the bucket store cannot be reached the decision depends on the operation
//! class: classes below `fail_closed_from` are admitted, the rest are rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::profiles::{ProfileQuota, RateLimitKey, RateLimitProfile};
use super::store::{InMemoryRateLimitStore, RateLimitStore};
use crate::access::OperationClass;
use crate::error::{OrchestratorError, Result};
use crate::logging::log_rate_limit_decision;
use crate::metrics;

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub auth: ProfileQuota,
    pub general: ProfileQuota,
    pub sync: ProfileQuota,
    pub bulk: ProfileQuota,
    pub render: ProfileQuota,
    /// Lowest operation class that is rejected when the store is unreachable
    pub fail_closed_from: OperationClass,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auth: ProfileQuota::new(5, 60),
            general: ProfileQuota::new(100, 60),
            sync: ProfileQuota::new(20, 60),
            bulk: ProfileQuota::new(5, 60),
            render: ProfileQuota::new(60, 60),
            fail_closed_from: OperationClass::Destructive,
        }
    }
}

impl RateLimitConfig {
    pub fn quota(&self, profile: RateLimitProfile) -> ProfileQuota {
        match profile {
            RateLimitProfile::Auth => self.auth,
            RateLimitProfile::General => self.general,
            RateLimitProfile::Sync => self.sync,
            RateLimitProfile::Bulk => self.bulk,
            RateLimitProfile::Render => self.render,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for profile in [
            RateLimitProfile::Auth,
            RateLimitProfile::General,
            RateLimitProfile::Sync,
            RateLimitProfile::Bulk,
            RateLimitProfile::Render,
        ] {
            let quota = self.quota(profile);
            if quota.limit == 0 || quota.window_secs == 0 {
                return Err(OrchestratorError::configuration(format!(
                    "rate limit profile '{profile}' needs a positive limit and window"
                )));
            }
        }
        Ok(())
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        limit: u32,
        remaining: u32,
        reset_at: DateTime<Utc>,
    },
    Limited {
        limit: u32,
        reset_at: DateTime<Utc>,
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("store", &"<RateLimitStore>")
            .finish()
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self { config, store }
    }

    /// Limiter backed by process-local buckets.
    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(config, Arc::new(InMemoryRateLimitStore::new()))
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub async fn check(
        &self,
        profile: RateLimitProfile,
        key: &RateLimitKey,
        class: OperationClass,
    ) -> Result<RateLimitDecision> {
        self.check_at(profile, key, class, Utc::now()).await
    }

    /// Check against an explicit clock reading.
    pub async fn check_at(
        &self,
        profile: RateLimitProfile,
        key: &RateLimitKey,
        class: OperationClass,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision> {
        let quota = self.config.quota(profile);
        if !self.config.enabled {
            return Ok(RateLimitDecision::Allowed {
                limit: quota.limit,
                remaining: quota.limit,
                reset_at: now,
            });
        }

        let bucket_key = format!("{profile}:{key}");
        let hit = match self.store.hit(&bucket_key, quota, now).await {
            Ok(hit) => hit,
            Err(error) if class < self.config.fail_closed_from => {
                warn!(
                    profile = %profile,
                    key = %key,
                    error = %error,
                    "Rate limit store unavailable, failing open"
                );
                return Ok(RateLimitDecision::Allowed {
                    limit: quota.limit,
                    remaining: quota.limit,
                    reset_at: now,
                });
            }
            Err(error) => {
                warn!(
                    profile = %profile,
                    key = %key,
                    error = %error,
                    "Rate limit store unavailable, failing closed"
                );
                return Err(OrchestratorError::call_failed(
                    "rate limit store",
                    error.to_string(),
                ));
            }
        };

        let bucket = hit.bucket;
        let decision = if hit.admitted {
            RateLimitDecision::Allowed {
                limit: bucket.limit,
                remaining: bucket.remaining,
                reset_at: bucket.reset_at,
            }
        } else {
            metrics::rate_limit_rejections_total()
                .add(1, &[opentelemetry::KeyValue::new("profile", profile.as_str())]);
            RateLimitDecision::Limited {
                limit: bucket.limit,
                reset_at: bucket.reset_at,
                retry_after: (bucket.reset_at - now).to_std().unwrap_or_default(),
            }
        };

        debug!(profile = %profile, key = %key, allowed = decision.is_allowed(), "Rate limit checked");
        Ok(decision)
    }

    /// Like [`check`](Self::check) but turns a rejection into a `RateLimited` error.
    pub async fn enforce(
        &self,
        profile: RateLimitProfile,
        key: &RateLimitKey,
        class: OperationClass,
    ) -> Result<RateLimitDecision> {
        let decision = self.check(profile, key, class).await?;
        if let RateLimitDecision::Limited {
            limit,
            reset_at,
            retry_after,
        } = decision
        {
            log_rate_limit_decision(profile.as_str(), key.as_str(), limit, retry_after);
            return Err(OrchestratorError::rate_limited(
                profile.as_str(),
                retry_after,
                reset_at,
            ));
        }
        Ok(decision)
    }
}
