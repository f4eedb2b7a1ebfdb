//! # Opsflow Worker
//!
//! Runs one scheduler replica against the PostgreSQL task store. Any number of
//! replicas may share a database; claims are coordinated through it.
//!
//! Configuration is read from `$OPSFLOW_CONFIG_DIR` (default `config/`) for the
//! environment named by `OPSFLOW_ENV`.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use opsflow_core::audit::{AuditLogger, PgAuditRepository};
use opsflow_core::collaborators::{
    Collaborators, InMemoryDeploymentSync, InMemoryObjectStorage, InMemoryObservability,
    InMemorySourceControl,
};
use opsflow_core::config::ConfigManager;
use opsflow_core::database::{DatabaseConnection, PgTaskStore};
use opsflow_core::executors::default_registry;
use opsflow_core::logging::init_structured_logging;
use opsflow_core::orchestration::{Orchestrator, OrchestratorContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_dir = std::env::var_os("OPSFLOW_CONFIG_DIR").map(PathBuf::from);
    let manager = ConfigManager::load_from_directory(config_dir).context("loading configuration")?;
    let config = manager.config().clone();
    init_structured_logging(&config.logging);

    let connection = DatabaseConnection::connect(&config.database)
        .await
        .context("connecting to the task database")?;
    let pool = connection.pool().clone();

    let collaborators = if manager.environment() == "development" {
        info!("Using in-memory collaborators for development");
        development_collaborators()
    } else {
        warn!("No collaborator clients configured; tasks will fail until an embedding process supplies them");
        Collaborators::new()
    };

    let registry = default_registry(&config.executors);
    let ctx = OrchestratorContext::new(
        config,
        Arc::new(PgTaskStore::new(pool.clone())),
        Arc::new(AuditLogger::new(Arc::new(PgAuditRepository::new(pool)))),
        collaborators,
    );
    let orchestrator = Orchestrator::new(ctx, registry);
    orchestrator.start().context("starting scheduler")?;
    info!(
        worker_id = %orchestrator.scheduler().worker_id(),
        environment = %manager.environment(),
        "Opsflow worker running"
    );

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutdown signal received");
    orchestrator.shutdown().await.context("draining in-flight attempts")?;
    connection.close().await;
    Ok(())
}

fn development_collaborators() -> Collaborators {
    Collaborators::new()
        .with_source_control(Arc::new(InMemorySourceControl::new().with_repository("infra", "main")))
        .with_deployment(Arc::new(InMemoryDeploymentSync::new().with_application("demo", "default")))
        .with_object_storage(Arc::new(InMemoryObjectStorage::new()))
        .with_observability(Arc::new(InMemoryObservability::new()))
}
