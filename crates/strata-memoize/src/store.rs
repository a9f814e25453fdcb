use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::handle::Handle;

const MIN_SWEEP_THRESHOLD: usize = 64;

/// Content-keyed registry of memo handles.
///
/// Binding a key that already has a live handle returns that handle, so two snapshots that
/// derive the same key share one computation and one result. Entries are weak: a handle lives
/// exactly as long as some owner (usually a snapshot) holds it.
pub struct Store<K, V, E> {
    inner: Mutex<StoreInner<K, V, E>>,
}

struct StoreInner<K, V, E> {
    entries: HashMap<K, Weak<Handle<K, V, E>>>,
    sweep_at: usize,
}

impl<K, V, E> Store<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                entries: HashMap::new(),
                sweep_at: MIN_SWEEP_THRESHOLD,
            }),
        }
    }

    /// Returns the live handle for `key`, or registers a new one computing `compute`.
    pub fn bind<F, Fut>(&self, key: K, compute: F) -> Arc<Handle<K, V, E>>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.entries.get(&key).and_then(Weak::upgrade) {
            return existing;
        }

        let handle = Handle::new(key.clone(), compute);
        inner.entries.insert(key, Arc::downgrade(&handle));
        if inner.entries.len() >= inner.sweep_at {
            inner.sweep();
        }
        handle
    }

    /// Returns the live handle for `key` without creating one.
    pub fn get(&self, key: &K) -> Option<Arc<Handle<K, V, E>>> {
        self.inner.lock().entries.get(key).and_then(Weak::upgrade)
    }

    /// Number of registered keys whose handle is still alive.
    pub fn live(&self) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }
}

impl<K, V, E> Default for Store<K, V, E>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V, E> StoreInner<K, V, E> {
    fn sweep(&mut self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.strong_count() > 0);
        self.sweep_at = (self.entries.len() * 2).max(MIN_SWEEP_THRESHOLD);
        tracing::trace!(
            target: "strata.memoize",
            removed = before - self.entries.len(),
            live = self.entries.len(),
            "swept dead memo handles"
        );
    }
}

impl<K, V, E> fmt::Debug for Store<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("entries", &self.inner.lock().entries.len())
            .finish()
    }
}
