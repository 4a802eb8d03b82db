//! Postgres connection used by the admin session store.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tower_sessions_sqlx_store::PostgresStore;

use crate::middleware::session_store;

/// Create the session pool.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(3)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Session store in the `admin` schema, with its table created.
///
/// # Errors
///
/// Returns `sqlx::Error` if the table cannot be created.
pub async fn prepare_session_store(pool: &PgPool) -> Result<PostgresStore, sqlx::Error> {
    let store = session_store(pool).map_err(sqlx::Error::Protocol)?;
    store.migrate().await?;
    Ok(store)
}
