//! Database migration commands.
//!
//! Migrations live in `migrations/` at the workspace root and are embedded at
//! compile time. They create the store tables, row-level security policies,
//! the profile-on-signup and stock triggers, and the session schemas.
//!
//! # Environment Variables
//!
//! - `MIGRATE_DATABASE_URL` - Connection string with DDL rights
//!   (falls back to `DATABASE_URL`)

use secrecy::ExposeSecret;
use shopfront_backend::ConfigError;
use shopfront_backend::config::get_database_url;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use thiserror::Error;
use tracing::info;

/// Embedded migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Apply every pending migration.
///
/// # Errors
///
/// Returns `MigrationError` if the URL is missing, the connection fails, or a
/// migration does not apply cleanly.
pub async fn run() -> Result<(), MigrationError> {
    let database_url = get_database_url("MIGRATE_DATABASE_URL")?;

    info!("Connecting to database...");
    let pool = PgPool::connect(database_url.expose_secret()).await?;

    info!(available = MIGRATOR.iter().count(), "Running migrations...");
    MIGRATOR.run(&pool).await?;
    info!("Migrations complete");

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_embedded_in_order() {
        let versions: Vec<i64> = MIGRATOR.iter().map(|m| m.version).collect();
        assert!(!versions.is_empty());
        assert!(versions.windows(2).all(|w| w.first() < w.last()));
    }
}
