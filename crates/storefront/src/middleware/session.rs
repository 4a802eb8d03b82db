//! Session middleware configuration.
//!
//! Sessions are stored in the hosted project's Postgres, in the `storefront`
//! schema created by the migrations. They hold the signed-in user's tokens,
//! the cart, the compare list and flash messages.

use sqlx::PgPool;
use tower_sessions::{Expiry, SessionManagerLayer};
use tower_sessions_sqlx_store::PostgresStore;

use crate::config::StorefrontConfig;

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "shopfront_session";

/// Schema holding the session table.
pub const SESSION_SCHEMA: &str = "storefront";

/// Session expiry time in seconds (7 days).
const SESSION_EXPIRY_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Session store in the `storefront` schema.
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
    config: &StorefrontConfig,
) -> SessionManagerLayer<PostgresStore> {
    SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(
            tower_sessions::cookie::time::Duration::seconds(SESSION_EXPIRY_SECONDS),
        ))
        .with_secure(config.is_secure())
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
}
