//! Application state shared across admin handlers.
//!
//! Every data service runs under the service-role key, so row-level policies
//! do not apply here; [`RequireAdmin`](crate::middleware::RequireAdmin) is
//! the only gate. Sign-in uses the anon key like any other client.

use std::sync::Arc;

use shopfront_backend::{
    AuthClient, BackendClient, BackendError, CrudService, QueryCache, RealtimeRelay,
    StorageClient,
};
use shopfront_core::{Category, Collection, NewArrival, Offer, Order, Product, Profile};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::config::AdminConfig;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: AdminConfig,
    pool: PgPool,
    service: BackendClient,
    cache: QueryCache,
    relay: RealtimeRelay,
    auth: AuthClient,
    storage: StorageClient,
    products: CrudService<Product>,
    categories: CrudService<Category>,
    collections: CrudService<Collection>,
    offers: CrudService<Offer>,
    new_arrivals: CrudService<NewArrival>,
    orders: CrudService<Order>,
    profiles: CrudService<Profile>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the
    /// service-role key is missing.
    pub fn new(config: AdminConfig, pool: PgPool) -> Result<Self, BackendError> {
        let anon = BackendClient::new(config.backend.clone())?;
        let service = anon.service()?;
        let cache = QueryCache::new(config.backend.cache_ttl, config.backend.cache_capacity);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                auth: AuthClient::new(anon),
                storage: StorageClient::new(service.clone()),
                products: CrudService::new(service.clone(), cache.clone()),
                categories: CrudService::new(service.clone(), cache.clone()),
                collections: CrudService::new(service.clone(), cache.clone()),
                offers: CrudService::new(service.clone(), cache.clone()),
                new_arrivals: CrudService::new(service.clone(), cache.clone()),
                orders: CrudService::uncached(service.clone()),
                profiles: CrudService::uncached(service.clone()),
                relay: RealtimeRelay::new(),
                shutdown: CancellationToken::new(),
                config,
                pool,
                service,
                cache,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AdminConfig {
        &self.inner.config
    }

    /// Session store pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Service-role backend client.
    #[must_use]
    pub fn service(&self) -> &BackendClient {
        &self.inner.service
    }

    #[must_use]
    pub fn cache(&self) -> &QueryCache {
        &self.inner.cache
    }

    #[must_use]
    pub fn relay(&self) -> &RealtimeRelay {
        &self.inner.relay
    }

    /// Anon-key auth client used for sign-in.
    #[must_use]
    pub fn auth(&self) -> &AuthClient {
        &self.inner.auth
    }

    #[must_use]
    pub fn storage(&self) -> &StorageClient {
        &self.inner.storage
    }

    #[must_use]
    pub fn products(&self) -> &CrudService<Product> {
        &self.inner.products
    }

    #[must_use]
    pub fn categories(&self) -> &CrudService<Category> {
        &self.inner.categories
    }

    #[must_use]
    pub fn collections(&self) -> &CrudService<Collection> {
        &self.inner.collections
    }

    #[must_use]
    pub fn offers(&self) -> &CrudService<Offer> {
        &self.inner.offers
    }

    #[must_use]
    pub fn new_arrivals(&self) -> &CrudService<NewArrival> {
        &self.inner.new_arrivals
    }

    #[must_use]
    pub fn orders(&self) -> &CrudService<Order> {
        &self.inner.orders
    }

    #[must_use]
    pub fn profiles(&self) -> &CrudService<Profile> {
        &self.inner.profiles
    }

    /// Cancelled when the server begins shutting down.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }
}
