//! Expiring query cache with table-scoped invalidation.
//!
//! Keys are `"<table>:<params>"` (see [`crate::query::Query::cache_key`]), so
//! dropping every entry for a table is a prefix match. Every invalidation is
//! also broadcast so pages and SSE streams can refresh.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::BackendError;

/// Buffer size of the invalidation channel.
const INVALIDATION_CHANNEL_CAPACITY: usize = 256;

/// A dropped cache scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    /// Table whose entries were dropped; `None` when the whole cache was cleared.
    pub table: Option<String>,
    /// Single key, when only one entry was dropped.
    pub key: Option<String>,
}

/// Cached JSON responses keyed by table and query.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<QueryCacheInner>,
}

struct QueryCacheInner {
    entries: Cache<String, Arc<Value>>,
    events: broadcast::Sender<Invalidation>,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.inner.entries.entry_count())
            .finish()
    }
}

impl QueryCache {
    /// Create a cache with a fixed TTL and a bounded number of entries.
    #[must_use]
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .support_invalidation_closures()
            .build();
        let (events, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(QueryCacheInner { entries, events }),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Value>> {
        self.inner.entries.get(key).await
    }

    pub async fn insert(&self, key: String, value: Arc<Value>) {
        self.inner.entries.insert(key, value).await;
    }

    /// Return the cached value or run `fetch` to fill it.
    ///
    /// Concurrent misses for the same key run one fetch and share its result.
    /// Failed fetches are not cached.
    ///
    /// # Errors
    ///
    /// Returns the fetch error, shared between every waiter of that fetch.
    pub async fn get_or_fetch<F>(&self, key: String, fetch: F) -> Result<Arc<Value>, BackendError>
    where
        F: Future<Output = Result<Arc<Value>, BackendError>>,
    {
        self.inner
            .entries
            .try_get_with(key, fetch)
            .await
            .map_err(BackendError::from_shared)
    }

    /// Drop every entry belonging to `table`.
    pub fn invalidate_table(&self, table: &str) {
        let prefix = format!("{table}:");
        if let Err(e) = self
            .inner
            .entries
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
        {
            warn!(table, error = %e, "Predicate invalidation failed, clearing cache");
            self.inner.entries.invalidate_all();
        }
        debug!(table, "Invalidated cached table");
        self.publish(Invalidation {
            table: Some(table.to_string()),
            key: None,
        });
    }

    /// Drop one entry.
    pub async fn invalidate_key(&self, key: &str) {
        self.inner.entries.invalidate(key).await;
        let table = key.split_once(':').map(|(t, _)| t.to_string());
        self.publish(Invalidation {
            table,
            key: Some(key.to_string()),
        });
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.inner.entries.invalidate_all();
        debug!("Cleared query cache");
        self.publish(Invalidation {
            table: None,
            key: None,
        });
    }

    /// Receive every future invalidation.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.inner.events.subscribe()
    }

    /// Approximate number of live entries.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entries.entry_count()
    }

    fn publish(&self, event: Invalidation) {
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }
}
