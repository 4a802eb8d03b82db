//! In-process fan-out of change events.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::ChangeEvent;
use crate::cache::QueryCache;

/// Buffer size of each per-table channel and of the all-tables channel.
const CHANNEL_CAPACITY: usize = 256;

/// State of the feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Fans change events out to subscribers.
///
/// Cheap to clone; clones share channels.
#[derive(Clone)]
pub struct RealtimeRelay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    tables: RwLock<HashMap<String, broadcast::Sender<ChangeEvent>>>,
    all: broadcast::Sender<ChangeEvent>,
    state: watch::Sender<ConnectionState>,
}

impl std::fmt::Debug for RealtimeRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeRelay")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Default for RealtimeRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeRelay {
    #[must_use]
    pub fn new() -> Self {
        let (all, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(RelayInner {
                tables: RwLock::new(HashMap::new()),
                all,
                state,
            }),
        }
    }

    /// Receive changes to one table.
    #[must_use]
    pub fn subscribe(&self, table: &str) -> broadcast::Receiver<ChangeEvent> {
        let mut tables = self
            .inner
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        tables
            .entry(table.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Receive changes to every table.
    #[must_use]
    pub fn subscribe_all(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.all.subscribe()
    }

    /// Deliver `event` to its table's subscribers and to all-table
    /// subscribers. Returns how many receivers got it.
    pub fn dispatch(&self, event: ChangeEvent) -> usize {
        debug!(table = %event.table, kind = ?event.kind, "Dispatching change event");
        let mut delivered = 0;
        {
            let tables = self
                .inner
                .tables
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(tx) = tables.get(&event.table) {
                delivered += tx.send(event.clone()).unwrap_or(0);
            }
        }
        delivered + self.inner.all.send(event).unwrap_or(0)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.inner.state.send_replace(state);
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Keep `cache` in step with the feed.
    ///
    /// Each table is invalidated once per burst: after an event, further
    /// events for the same table within `debounce` push the invalidation
    /// back. A lagged receiver or a reconnect (events may have been missed)
    /// clears the whole cache.
    pub fn attach_cache(&self, cache: QueryCache, debounce: Duration) -> JoinHandle<()> {
        let events = self.subscribe_all();
        let state = self.watch_state();
        tokio::spawn(invalidate_on_change(events, state, cache, debounce))
    }
}

async fn invalidate_on_change(
    mut events: broadcast::Receiver<ChangeEvent>,
    mut state: watch::Receiver<ConnectionState>,
    cache: QueryCache,
    debounce: Duration,
) {
    let mut pending: HashMap<String, Instant> = HashMap::new();
    let mut seen_connected = *state.borrow_and_update() == ConnectionState::Connected;

    loop {
        let next_deadline = pending.values().min().copied();

        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    pending.insert(event.table, Instant::now() + debounce);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change relay lagged, clearing cache");
                    pending.clear();
                    cache.clear();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                if *state.borrow_and_update() == ConnectionState::Connected {
                    if seen_connected {
                        info!("Change feed reconnected, clearing cache");
                        pending.clear();
                        cache.clear();
                    }
                    seen_connected = true;
                }
            }
            () = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                if next_deadline.is_some() =>
            {
                let now = Instant::now();
                pending.retain(|table, deadline| {
                    if *deadline <= now {
                        cache.invalidate_table(table);
                        false
                    } else {
                        true
                    }
                });
            }
        }
    }
    debug!("Cache invalidation task stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::realtime::ChangeKind;

    fn event(table: &str) -> ChangeEvent {
        ChangeEvent::new(table, ChangeKind::Update, json!({"id": "x"}))
    }

    #[tokio::test]
    async fn test_dispatch_fans_out_by_table() {
        let relay = RealtimeRelay::new();
        let mut products = relay.subscribe("products");
        let mut categories = relay.subscribe("categories");
        let mut all = relay.subscribe_all();

        assert_eq!(relay.dispatch(event("products")), 2);

        assert_eq!(products.recv().await.unwrap().table, "products");
        assert_eq!(all.recv().await.unwrap().table, "products");
        assert!(matches!(categories.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_dispatch_without_subscribers() {
        assert_eq!(RealtimeRelay::new().dispatch(event("offers")), 0);
    }

    async fn seeded_cache() -> QueryCache {
        let cache = QueryCache::new(Duration::from_secs(300), 100);
        cache.insert("products:a".into(), Arc::new(json!(1))).await;
        cache.insert("categories:a".into(), Arc::new(json!(2))).await;
        cache
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_causes_one_invalidation() {
        let relay = RealtimeRelay::new();
        let cache = seeded_cache().await;
        let mut invalidations = cache.subscribe();
        let _task = relay.attach_cache(cache.clone(), Duration::from_millis(300));
        tokio::task::yield_now().await;

        for _ in 0..5 {
            relay.dispatch(event("products"));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(cache.get("products:a").await.is_some());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(cache.get("products:a").await.is_none());
        assert!(cache.get("categories:a").await.is_some());

        let first = invalidations.try_recv().unwrap();
        assert_eq!(first.table.as_deref(), Some("products"));
        assert!(matches!(invalidations.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_clears_cache() {
        let relay = RealtimeRelay::new();
        relay.set_state(ConnectionState::Connected);
        let cache = seeded_cache().await;
        let _task = relay.attach_cache(cache.clone(), Duration::from_millis(300));
        tokio::task::yield_now().await;

        relay.set_state(ConnectionState::Disconnected);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.get("categories:a").await.is_some());

        relay.set_state(ConnectionState::Connected);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.get("categories:a").await.is_none());
    }
}
