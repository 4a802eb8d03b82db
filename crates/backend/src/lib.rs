//! Shopfront Backend - Client for the hosted Postgres backend.
//!
//! Everything the applications need to talk to the hosted project:
//!
//! - [`client`] - REST table access (`PostgREST` query syntax) with retry,
//!   timeouts and de-duplication of identical in-flight reads
//! - [`crud`] - Typed create/read/update/delete for every [`shopfront_core::Entity`]
//! - [`cache`] - TTL query cache with table-level invalidation
//! - [`realtime`] - WebSocket change feed that keeps the cache fresh
//! - [`auth`] - Sign-up, sign-in, token refresh and password recovery
//! - [`storage`] - Product image uploads
//! - [`error`] - Error classification into user-facing kinds
//!
//! # Example
//!
//! ```rust,ignore
//! use shopfront_backend::{BackendClient, BackendConfig, CrudService, Query, QueryCache};
//! use shopfront_core::Product;
//!
//! let config = BackendConfig::from_env()?;
//! let cache = QueryCache::new(config.cache_ttl, config.cache_capacity);
//! let products = CrudService::<Product>::new(BackendClient::new(config)?, cache);
//!
//! let featured = products
//!     .list(&Query::new().eq("is_featured", true).limit(8))
//!     .await?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod crud;
pub mod dedup;
pub mod error;
pub mod query;
pub mod realtime;
pub mod retry;
pub mod storage;

pub use auth::{AuthClient, AuthSession, AuthUser, SignUpOutcome, UserAttributes};
pub use cache::{Invalidation, QueryCache};
pub use client::BackendClient;
pub use config::{BackendConfig, ConfigError};
pub use crud::{CrudService, Page};
pub use dedup::{BatchLoader, InFlight};
pub use error::{BackendError, ErrorKind};
pub use query::{MAX_PAGE, Order, Query, clamp_page};
pub use realtime::{ChangeEvent, ChangeKind, ConnectionState, RealtimeConnection, RealtimeRelay};
pub use retry::{Replay, RetryPolicy};
pub use storage::StorageClient;
