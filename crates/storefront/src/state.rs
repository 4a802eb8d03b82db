//! Application state shared across handlers.

use std::sync::Arc;

use shopfront_backend::{
    AuthClient, BackendClient, BackendError, CrudService, QueryCache, RealtimeRelay,
};
use shopfront_core::{Address, Order, Profile, WishlistItem};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::config::StorefrontConfig;
use crate::services::Catalog;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like the backend client, cache and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: PgPool,
    client: BackendClient,
    cache: QueryCache,
    relay: RealtimeRelay,
    catalog: Catalog,
    auth: AuthClient,
    profiles: CrudService<Profile>,
    addresses: CrudService<Address>,
    orders: CrudService<Order>,
    wishlist: CrudService<WishlistItem>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `config` - Storefront configuration
    /// * `pool` - `PostgreSQL` connection pool for the session store
    ///
    /// # Errors
    ///
    /// Returns an error if the backend HTTP client cannot be built.
    pub fn new(config: StorefrontConfig, pool: PgPool) -> Result<Self, BackendError> {
        let client = BackendClient::new(config.backend.clone())?;
        let cache = QueryCache::new(config.backend.cache_ttl, config.backend.cache_capacity);
        let catalog = Catalog::new(client.clone(), cache.clone());

        // Account tables are read under each visitor's token, so they bypass
        // the shared cache.
        Ok(Self {
            inner: Arc::new(AppStateInner {
                auth: AuthClient::new(client.clone()),
                profiles: CrudService::uncached(client.clone()),
                addresses: CrudService::uncached(client.clone()),
                orders: CrudService::uncached(client.clone()),
                wishlist: CrudService::uncached(client.clone()),
                relay: RealtimeRelay::new(),
                shutdown: CancellationToken::new(),
                config,
                pool,
                client,
                cache,
                catalog,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Session store pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Anonymous backend client.
    #[must_use]
    pub fn client(&self) -> &BackendClient {
        &self.inner.client
    }

    #[must_use]
    pub fn cache(&self) -> &QueryCache {
        &self.inner.cache
    }

    #[must_use]
    pub fn relay(&self) -> &RealtimeRelay {
        &self.inner.relay
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    #[must_use]
    pub fn auth(&self) -> &AuthClient {
        &self.inner.auth
    }

    /// Profiles; scope with [`CrudService::for_user`] before use.
    #[must_use]
    pub fn profiles(&self) -> &CrudService<Profile> {
        &self.inner.profiles
    }

    #[must_use]
    pub fn addresses(&self) -> &CrudService<Address> {
        &self.inner.addresses
    }

    #[must_use]
    pub fn orders(&self) -> &CrudService<Order> {
        &self.inner.orders
    }

    #[must_use]
    pub fn wishlist(&self) -> &CrudService<WishlistItem> {
        &self.inner.wishlist
    }

    /// Cancelled when the server begins shutting down.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }
}
