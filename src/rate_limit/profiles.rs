use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Named quota families. Each has its own ceiling and window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitProfile {
    /// Sign-in and credential endpoints
    Auth,
    /// Everything without a dedicated profile
    General,
    /// Deployment sync and refresh, which are expensive downstream
    Sync,
    /// Destructive bulk edits and deletions
    Bulk,
    /// Image-rendering proxy calls
    Render,
}

impl RateLimitProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::General => "general",
            Self::Sync => "sync",
            Self::Bulk => "bulk",
            Self::Render => "render",
        }
    }
}

impl fmt::Display for RateLimitProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `limit` requests per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileQuota {
    pub limit: u32,
    pub window_secs: u64,
}

impl ProfileQuota {
    pub const fn new(limit: u32, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Bucket identifier: the most specific of organization/user/ip available.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// `org:<tenant>:user:<user>`
    pub fn for_user(tenant_id: &str, user_id: &str) -> Self {
        Self(format!("org:{tenant_id}:user:{user_id}"))
    }

    /// `ip:<addr>`
    pub fn for_ip(addr: IpAddr) -> Self {
        Self(format!("ip:{addr}"))
    }

    /// Compose from whatever identity parts a request carries.
    pub fn from_parts(tenant_id: Option<&str>, user_id: Option<&str>, ip: Option<IpAddr>) -> Self {
        match (tenant_id, user_id, ip) {
            (Some(tenant), Some(user), _) => Self::for_user(tenant, user),
            (None, Some(user), _) => Self(format!("user:{user}")),
            (Some(tenant), None, _) => Self(format!("org:{tenant}")),
            (None, None, Some(addr)) => Self::for_ip(addr),
            (None, None, None) => Self("ip:unknown".to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_composition() {
        assert_eq!(
            RateLimitKey::from_parts(Some("acme"), Some("alice"), None).as_str(),
            "org:acme:user:alice"
        );
        let ip: IpAddr = "10.0.0.7".parse().unwrap();
        assert_eq!(
            RateLimitKey::from_parts(None, None, Some(ip)).as_str(),
            "ip:10.0.0.7"
        );
        assert_eq!(
            RateLimitKey::from_parts(Some("acme"), Some("alice"), Some(ip)).as_str(),
            "org:acme:user:alice"
        );
        assert_eq!(RateLimitKey::from_parts(None, None, None).as_str(), "ip:unknown");
    }
}
