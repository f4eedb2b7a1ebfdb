//! Append-only audit trail of state-changing operations.

pub mod logger;
pub mod postgres;
pub mod repository;

pub use logger::{AuditLogger, AuditRecord};
pub use postgres::PgAuditRepository;
pub use repository::{AuditRepository, InMemoryAuditRepository};
