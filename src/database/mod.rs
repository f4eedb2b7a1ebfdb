//! # Database Operations
//!
//! Task persistence behind the [`TaskStore`] trait.
//!
//! ## Key Components
//!
//! - [`task_store`] - The store contract shared by every backend
//! - [`postgres_store`] - PostgreSQL backend, safe across replicas
//! - [`memory_store`] - Single-process backend for tests and local runs
//! - [`connection`] - Pool construction and embedded migrations
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use opsflow_core::config::DatabaseConfig;
//! use opsflow_core::database::{DatabaseConnection, PgTaskStore};
//!
//! # async fn example() -> opsflow_core::error::Result<()> {
//! let db = DatabaseConnection::connect(&DatabaseConfig::default()).await?;
//! let store = PgTaskStore::new(db.pool().clone());
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod memory_store;
pub mod postgres_store;
pub mod task_store;

pub use connection::{DatabaseConnection, MIGRATOR};
pub use memory_store::InMemoryTaskStore;
pub use postgres_store::PgTaskStore;
pub use task_store::{ClaimRequest, TaskStore};
