//! Session middleware configuration for admin.
//!
//! Sessions live in the `admin` schema of the hosted Postgres, apart from the
//! storefront's, with stricter cookie settings (SameSite=Strict, 24hr expiry).

use sqlx::PgPool;
use tower_sessions::{Expiry, SessionManagerLayer};
use tower_sessions_sqlx_store::PostgresStore;

use crate::config::AdminConfig;

/// Session cookie name for admin.
pub const SESSION_COOKIE_NAME: &str = "shopfront_admin_session";

/// Schema holding the session table.
pub const SESSION_SCHEMA: &str = "admin";

/// Session expiry time in seconds (24 hours - stricter than storefront).
const SESSION_EXPIRY_SECONDS: i64 = 24 * 60 * 60;

/// Session store in the `admin` schema.
///
/// # Errors
///
/// Returns the store's message if the schema or table name is rejected.
pub fn session_store(pool: &PgPool) -> Result<PostgresStore, String> {
    PostgresStore::new(pool.clone())
        .with_schema_name(SESSION_SCHEMA)?
        .with_table_name("session")
}

/// Create the session layer over `store`.
#[must_use]
pub fn create_session_layer(
    store: PostgresStore,
    config: &AdminConfig,
) -> SessionManagerLayer<PostgresStore> {
    SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(
            tower_sessions::cookie::time::Duration::seconds(SESSION_EXPIRY_SECONDS),
        ))
        .with_secure(config.is_secure())
        // SameSite=Strict for admin (stricter than storefront's Lax)
        .with_same_site(tower_sessions::cookie::SameSite::Strict)
        .with_http_only(true)
        .with_path("/")
}
