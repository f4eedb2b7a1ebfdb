//! Caller identity, tenant and role resolution.

pub mod context;
pub mod roles;

pub use context::{
    require_class, require_role, require_tenant, AccessContext, AccessContextBuilder,
    RequestCredentials, SessionIdentity, SessionResolver, StaticSessionResolver,
    TenantMembership,
};
pub use roles::{OperationClass, Role};
