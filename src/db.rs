//! PostgreSQL connection pool (SPEC_FULL §4.16, §6).

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::error::PersistenceError;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let max_connections = std::env::var("PG_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), PersistenceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Runs the crate's embedded schema migrations. Idempotent: every
    /// statement is `CREATE ... IF NOT EXISTS`.
    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::query(crate::schema::SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}
