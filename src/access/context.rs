//! # Access Context
//!
//! Resolves `(actor, tenant, role)` for each inbound request and exposes the single
//! role guard every mutating path calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use super::roles::{OperationClass, Role};
use crate::error::{OrchestratorError, Result};
use crate::rate_limit::RateLimitKey;

/// Credential material extracted from a request by the transport layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCredentials {
    pub session_token: Option<String>,
    pub client_ip: Option<IpAddr>,
    /// Tenant the caller asked to act in; defaults to the session's default tenant
    pub requested_tenant: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMembership {
    pub tenant_id: String,
    pub role: Role,
}

/// Identity behind a valid session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: String,
    pub memberships: Vec<TenantMembership>,
    pub default_tenant: Option<String>,
}

impl SessionIdentity {
    fn membership(&self, tenant_id: &str) -> Option<&TenantMembership> {
        self.memberships.iter().find(|m| m.tenant_id == tenant_id)
    }
}

/// Looks up the identity behind a session token.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    /// `Ok(None)` for unknown or expired sessions.
    async fn resolve(&self, session_token: &str) -> Result<Option<SessionIdentity>>;
}

/// Fixed token table, for development deployments and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticSessionResolver {
    sessions: HashMap<String, SessionIdentity>,
}

impl StaticSessionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, token: impl Into<String>, identity: SessionIdentity) -> Self {
        self.sessions.insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl SessionResolver for StaticSessionResolver {
    async fn resolve(&self, session_token: &str) -> Result<Option<SessionIdentity>> {
        Ok(self.sessions.get(session_token).cloned())
    }
}

/// Resolved caller for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    pub actor_user_id: String,
    pub tenant_id: String,
    pub role: Role,
    pub client_ip: Option<IpAddr>,
}

impl AccessContext {
    pub fn new(actor_user_id: impl Into<String>, tenant_id: impl Into<String>, role: Role) -> Self {
        Self {
            actor_user_id: actor_user_id.into(),
            tenant_id: tenant_id.into(),
            role,
            client_ip: None,
        }
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Most specific rate-limit identifier for this caller.
    pub fn rate_limit_key(&self) -> RateLimitKey {
        RateLimitKey::for_user(&self.tenant_id, &self.actor_user_id)
    }
}

/// Fail closed unless `ctx.role >= minimum`.
pub fn require_role(ctx: &AccessContext, minimum: Role) -> Result<()> {
    if ctx.role.satisfies(minimum) {
        return Ok(());
    }
    warn!(
        actor = %ctx.actor_user_id,
        tenant = %ctx.tenant_id,
        role = %ctx.role,
        required = %minimum,
        "Role check failed"
    );
    Err(OrchestratorError::forbidden(format!(
        "role {} is below required {minimum}",
        ctx.role
    ))
    .with_details(serde_json::json!({
        "role": ctx.role,
        "required": minimum,
    })))
}

/// `require_role` for the documented minimum of an operation class.
pub fn require_class(ctx: &AccessContext, class: OperationClass) -> Result<()> {
    require_role(ctx, class.minimum_role())
}

/// Reject access to resources of another tenant.
pub fn require_tenant(ctx: &AccessContext, tenant_id: &str) -> Result<()> {
    if ctx.tenant_id == tenant_id {
        return Ok(());
    }
    warn!(
        actor = %ctx.actor_user_id,
        tenant = %ctx.tenant_id,
        resource_tenant = %tenant_id,
        "Cross-tenant access rejected"
    );
    Err(OrchestratorError::forbidden("resource belongs to another tenant"))
}

/// Builds [`AccessContext`]s from request credentials.
#[derive(Clone)]
pub struct AccessContextBuilder {
    resolver: Arc<dyn SessionResolver>,
}

impl std::fmt::Debug for AccessContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessContextBuilder").finish_non_exhaustive()
    }
}

impl AccessContextBuilder {
    pub fn new(resolver: Arc<dyn SessionResolver>) -> Self {
        Self { resolver }
    }

    pub async fn build(&self, credentials: &RequestCredentials) -> Result<AccessContext> {
        let token = credentials
            .session_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OrchestratorError::forbidden("no session credential presented"))?;

        let identity = self
            .resolver
            .resolve(token)
            .await?
            .ok_or_else(|| OrchestratorError::forbidden("session is invalid or expired"))?;

        let tenant_id = credentials
            .requested_tenant
            .clone()
            .or_else(|| identity.default_tenant.clone())
            .or_else(|| identity.memberships.first().map(|m| m.tenant_id.clone()))
            .ok_or_else(|| OrchestratorError::forbidden("user has no tenant membership"))?;

        let membership = identity.membership(&tenant_id).ok_or_else(|| {
            OrchestratorError::forbidden(format!("user is not a member of tenant {tenant_id}"))
        })?;

        debug!(
            actor = %identity.user_id,
            tenant = %tenant_id,
            role = %membership.role,
            "Access context resolved"
        );

        Ok(AccessContext {
            actor_user_id: identity.user_id.clone(),
            tenant_id,
            role: membership.role,
            client_ip: credentials.client_ip,
        })
    }
}
