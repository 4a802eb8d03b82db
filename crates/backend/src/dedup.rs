//! Request de-duplication and by-id batching.
//!
//! [`InFlight`] lets identical concurrent requests share one backend call.
//! [`BatchLoader`] collects by-id lookups issued within a short window and
//! resolves them with one `id=in.(...)` query.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::BackendError;

// =============================================================================
// In-flight de-duplication
// =============================================================================

/// Keyed map of running requests.
///
/// The first caller for a key starts the request; later callers with the same
/// key await the same shared future. The entry is removed once the request
/// completes, so the next call starts fresh.
pub struct InFlight<T> {
    pending: Arc<Mutex<HashMap<String, Shared<BoxFuture<'static, T>>>>>,
}

impl<T> Clone for InFlight<T> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<T> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            pending: Arc::default(),
        }
    }
}

impl<T> std::fmt::Debug for InFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight")
            .field("pending", &self.len())
            .finish()
    }
}

impl<T> InFlight<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests currently running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> InFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Run `fut` under `key`, or join the identical request already running.
    ///
    /// `fut` is dropped unpolled when another caller owns the key.
    pub async fn run<F>(&self, key: String, fut: F) -> T
    where
        F: Future<Output = T> + Send + 'static,
    {
        let shared = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = pending.get(&key) {
                debug!(key = %key, "Joining in-flight request");
                existing.clone()
            } else {
                let shared = fut.boxed().shared();
                pending.insert(key.clone(), shared.clone());
                shared
            }
        };

        let output = shared.clone().await;

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.get(&key).is_some_and(|s| s.ptr_eq(&shared)) {
            pending.remove(&key);
        }
        output
    }
}

// =============================================================================
// Batch loader
// =============================================================================

type Reply<V> = oneshot::Sender<Result<Option<V>, Arc<BackendError>>>;

/// Collects single-key lookups into batched fetches.
///
/// A batch is flushed when the window elapses after its first key or when it
/// reaches `max_batch` keys. Each caller receives its own row, or `None` when
/// the fetch returned nothing for that key.
pub struct BatchLoader<K, V> {
    tx: mpsc::UnboundedSender<(K, Reply<V>)>,
}

impl<K, V> Clone for BatchLoader<K, V> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for BatchLoader<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchLoader")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<K, V> BatchLoader<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub const DEFAULT_WINDOW: Duration = Duration::from_millis(10);
    pub const DEFAULT_MAX_BATCH: usize = 100;

    /// Spawn the collector task. Must be called inside a tokio runtime.
    ///
    /// `fetch` receives distinct keys and returns the rows it found.
    pub fn new<F, Fut>(window: Duration, max_batch: usize, fetch: F) -> Self
    where
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashMap<K, V>, BackendError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(collect(rx, window, max_batch.max(1), Arc::new(fetch)));
        Self { tx }
    }

    /// Look up one key.
    ///
    /// # Errors
    ///
    /// Returns the batch's fetch error, or `BackendError::Closed` if the
    /// collector task has stopped.
    pub async fn load(&self, key: K) -> Result<Option<V>, BackendError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send((key, reply))
            .map_err(|_| BackendError::Closed("batch loader"))?;
        rx.await
            .map_err(|_| BackendError::Closed("batch loader"))?
            .map_err(BackendError::from_shared)
    }

    /// Look up several keys, preserving their order.
    ///
    /// # Errors
    ///
    /// Returns the first error any lookup produced.
    pub async fn load_many(&self, keys: Vec<K>) -> Result<Vec<Option<V>>, BackendError> {
        join_all(keys.into_iter().map(|k| self.load(k)))
            .await
            .into_iter()
            .collect()
    }
}

async fn collect<K, V, F, Fut>(
    mut rx: mpsc::UnboundedReceiver<(K, Reply<V>)>,
    window: Duration,
    max_batch: usize,
    fetch: Arc<F>,
) where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HashMap<K, V>, BackendError>> + Send + 'static,
{
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        while batch.len() < max_batch {
            tokio::select! {
                () = &mut deadline => break,
                next = rx.recv() => match next {
                    Some(request) => batch.push(request),
                    None => break,
                },
            }
        }

        let mut keys: Vec<K> = Vec::with_capacity(batch.len());
        for (key, _) in &batch {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        debug!(keys = keys.len(), waiters = batch.len(), "Flushing batch");

        let fetch = Arc::clone(&fetch);
        tokio::spawn(async move {
            match fetch(keys).await {
                Ok(found) => {
                    for (key, reply) in batch {
                        let _ = reply.send(Ok(found.get(&key).cloned()));
                    }
                }
                Err(e) => {
                    let e = Arc::new(e);
                    for (_, reply) in batch {
                        let _ = reply.send(Err(Arc::clone(&e)));
                    }
                }
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_shares_one_call() {
        let inflight: InFlight<usize> = InFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let make = |calls: Arc<AtomicUsize>| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            calls.fetch_add(1, Ordering::SeqCst) + 1
        };

        let (a, b, c) = tokio::join!(
            inflight.run("k".into(), make(Arc::clone(&calls))),
            inflight.run("k".into(), make(Arc::clone(&calls))),
            inflight.run("k".into(), make(Arc::clone(&calls))),
        );
        assert_eq!((a, b, c), (1, 1, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(inflight.is_empty());

        // Completed entries are not reused.
        let d = inflight.run("k".into(), make(Arc::clone(&calls))).await;
        assert_eq!(d, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_distinct_keys_run_separately() {
        let inflight: InFlight<&'static str> = InFlight::new();
        let (a, b) = tokio::join!(
            inflight.run("a".into(), async { "a" }),
            inflight.run("b".into(), async { "b" }),
        );
        assert_eq!((a, b), ("a", "b"));
    }

    fn loader(calls: Arc<AtomicUsize>, max_batch: usize) -> BatchLoader<u32, String> {
        BatchLoader::new(Duration::from_millis(10), max_batch, move |keys: Vec<u32>| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok::<_, BackendError>(
                    keys.into_iter()
                        .filter(|k| k % 2 == 0)
                        .map(|k| (k, format!("row-{k}")))
                        .collect::<HashMap<_, _>>(),
                )
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_loader_batches_within_window() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = loader(Arc::clone(&calls), 100);

        let (a, b, c, again) = tokio::join!(
            loader.load(2),
            loader.load(3),
            loader.load(4),
            loader.load(2)
        );
        assert_eq!(a.unwrap().as_deref(), Some("row-2"));
        assert_eq!(b.unwrap(), None);
        assert_eq!(c.unwrap().as_deref(), Some("row-4"));
        assert_eq!(again.unwrap().as_deref(), Some("row-2"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_loader_flushes_at_max_batch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = loader(Arc::clone(&calls), 2);

        let rows = loader.load_many(vec![2, 4, 6, 8]).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(Option::is_some));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_loader_shares_errors() {
        let loader: BatchLoader<u32, String> =
            BatchLoader::new(Duration::from_millis(10), 10, |_| async {
                Err::<HashMap<u32, String>, _>(BackendError::Timeout(Duration::from_secs(1)))
            });
        let (a, b) = tokio::join!(loader.load(1), loader.load(2));
        assert!(a.unwrap_err().is_retryable());
        assert!(b.unwrap_err().is_retryable());
    }
}
