//! Per-caller admission control.

pub mod limiter;
pub mod profiles;
pub mod store;

pub use limiter::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use profiles::{ProfileQuota, RateLimitKey, RateLimitProfile};
pub use store::{
    InMemoryRateLimitStore, RateLimitBucket, RateLimitStore, RateLimitStoreError, WindowHit,
};
