use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::config::{loader::mask_database_url, DatabaseConfig};
use crate::error::{OrchestratorError, Result};

/// Embedded schema migrations under `migrations/`
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| {
                OrchestratorError::storage(format!(
                    "failed to connect to {}: {e}",
                    mask_database_url(&config.url)
                ))
            })?;

        info!(
            url = %mask_database_url(&config.url),
            max_connections = config.max_connections,
            "🗄️ Database pool ready"
        );

        let connection = Self { pool };
        if config.run_migrations {
            connection.migrate().await?;
        }
        Ok(connection)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| OrchestratorError::storage(format!("migration failed: {e}")))?;
        info!("🗄️ Schema migrations applied");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS health")
            .fetch_one(&self.pool)
            .await?;

        let health: i32 = row.try_get("health")?;
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
