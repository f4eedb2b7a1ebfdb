//! Counter storage for rate-limit windows.
//!
//! Buckets are ephemeral and may be lost at any time; losing one only resets that
//! caller's window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::profiles::ProfileQuota;

/// Counter state for one `(profile, identifier)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub limit: u32,
    pub window_start: DateTime<Utc>,
    pub window_duration_secs: u64,
    /// Requests admitted in the current window
    pub count: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitBucket {
    fn open(quota: ProfileQuota, now: DateTime<Utc>) -> Self {
        Self {
            limit: quota.limit,
            window_start: now,
            window_duration_secs: quota.window_secs,
            count: 0,
            remaining: quota.limit,
            reset_at: now + window_delta(quota.window_secs),
        }
    }

    /// Register one request; returns whether it was admitted.
    pub fn hit(&mut self, quota: ProfileQuota, now: DateTime<Utc>) -> bool {
        if now >= self.reset_at || self.limit != quota.limit {
            *self = Self::open(quota, now);
        }
        if self.count >= self.limit {
            return false;
        }
        self.count += 1;
        self.remaining = self.limit - self.count;
        true
    }
}

/// Longest window honoured; larger configured windows are clamped.
const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

fn window_delta(window_secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(window_secs.min(MAX_WINDOW_SECS) as i64)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitStoreError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of registering a request against a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    pub admitted: bool,
    pub bucket: RateLimitBucket,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn hit(
        &self,
        bucket_key: &str,
        quota: ProfileQuota,
        now: DateTime<Utc>,
    ) -> Result<WindowHit, RateLimitStoreError>;
}

/// How often `hit` sweeps buckets whose window has ended
const DEFAULT_SWEEP_INTERVAL_SECS: i64 = 60;

/// Process-local buckets.
///
/// Expired buckets are swept from within `hit` at most once per sweep interval,
/// so the map stays bounded by the callers seen in roughly one window.
#[derive(Debug)]
pub struct InMemoryRateLimitStore {
    buckets: DashMap<String, RateLimitBucket>,
    sweep_interval: chrono::Duration,
    next_sweep: Mutex<Option<DateTime<Utc>>>,
}

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        Self {
            buckets: DashMap::new(),
            sweep_interval: chrono::Duration::seconds(DEFAULT_SWEEP_INTERVAL_SECS),
            next_sweep: Mutex::new(None),
        }
    }
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = chrono::Duration::from_std(interval).unwrap_or(self.sweep_interval);
        self
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets whose window ended before `now`.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.reset_at > now);
        before.saturating_sub(self.buckets.len())
    }

    /// Run `evict_expired` if the sweep interval has elapsed since the last one
    fn sweep_if_due(&self, now: DateTime<Utc>) {
        let due = {
            let mut next = self.next_sweep.lock();
            match *next {
                Some(at) if now < at => false,
                Some(_) => {
                    *next = Some(now + self.sweep_interval);
                    true
                }
                None => {
                    *next = Some(now + self.sweep_interval);
                    false
                }
            }
        };
        if due {
            let evicted = self.evict_expired(now);
            if evicted > 0 {
                debug!(evicted, remaining = self.buckets.len(), "Evicted expired rate-limit buckets");
            }
        }
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn hit(
        &self,
        bucket_key: &str,
        quota: ProfileQuota,
        now: DateTime<Utc>,
    ) -> Result<WindowHit, RateLimitStoreError> {
        self.sweep_if_due(now);
        let mut entry = self
            .buckets
            .entry(bucket_key.to_string())
            .or_insert_with(|| RateLimitBucket::open(quota, now));
        let admitted = entry.hit(quota, now);
        Ok(WindowHit {
            admitted,
            bucket: *entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_window_resets() {
        let quota = ProfileQuota::new(2, 60);
        let t0 = Utc::now();
        let mut bucket = RateLimitBucket::open(quota, t0);
        assert!(bucket.hit(quota, t0));
        assert!(bucket.hit(quota, t0));
        assert!(!bucket.hit(quota, t0 + chrono::Duration::seconds(59)));
        assert_eq!(bucket.remaining, 0);
        assert!(bucket.hit(quota, t0 + chrono::Duration::seconds(60)));
        assert_eq!(bucket.remaining, 1);
    }

    #[tokio::test]
    async fn test_eviction() {
        let store = InMemoryRateLimitStore::new();
        let quota = ProfileQuota::new(1, 1);
        let t0 = Utc::now();
        store.hit("a", quota, t0).await.unwrap();
        store.hit("b", quota, t0).await.unwrap();
        assert_eq!(store.bucket_count(), 2);
        assert_eq!(store.evict_expired(t0 + chrono::Duration::seconds(2)), 2);
        assert_eq!(store.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_hit_sweeps_expired_buckets_on_schedule() {
        let store = InMemoryRateLimitStore::new().with_sweep_interval(Duration::from_secs(10));
        let quota = ProfileQuota::new(5, 1);
        let t0 = Utc::now();
        for addr in ["ip:10.0.0.1", "ip:10.0.0.2", "ip:10.0.0.3"] {
            store.hit(addr, quota, t0).await.unwrap();
        }
        assert_eq!(store.bucket_count(), 3);

        // Windows have ended but the next sweep is not due yet
        store.hit("ip:10.0.0.4", quota, t0 + chrono::Duration::seconds(5)).await.unwrap();
        assert_eq!(store.bucket_count(), 4);

        store.hit("ip:10.0.0.5", quota, t0 + chrono::Duration::seconds(11)).await.unwrap();
        assert_eq!(store.bucket_count(), 1);
    }
}
