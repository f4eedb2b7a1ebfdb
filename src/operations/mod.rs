//! Synchronous operations: direct, audited collaborator calls made on behalf of
//! an authenticated caller, bypassing the task queue.

pub mod gateway;

pub use gateway::OperationGateway;
