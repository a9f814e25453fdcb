use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use strata_memoize::Store;
use strata_vfs::{ContentStore, FileSystem, LocalFs};

use crate::action::{ActionKey, ActionResult};
use crate::error::{AnalysisError, CheckError};
use crate::package::{CheckedPackage, PackageKey};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Process-lifetime owner of the content store and of the memo stores.
///
/// Constructed explicitly and passed to every session; tests build independent caches.
pub struct Cache {
    id: u64,
    store: ContentStore,
    pub(crate) packages: Store<PackageKey, CheckedPackage, CheckError>,
    pub(crate) actions: Store<ActionKey, ActionResult, AnalysisError>,
}

impl Cache {
    pub fn new(fs: Arc<dyn FileSystem>) -> Arc<Self> {
        let cache = Arc::new(Self {
            id: next_id(),
            store: ContentStore::new(fs),
            packages: Store::new(),
            actions: Store::new(),
        });
        tracing::debug!(target: "strata.cache", cache = cache.id, "created cache");
        cache
    }

    /// A cache reading from the local file system.
    pub fn local() -> Arc<Self> {
        Self::new(Arc::new(LocalFs::new()))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn content_store(&self) -> &ContentStore {
        &self.store
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        self.store.fs()
    }

    /// Number of package handles some snapshot still holds.
    pub fn live_packages(&self) -> usize {
        self.packages.live()
    }

    pub fn live_actions(&self) -> usize {
        self.actions.live()
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("id", &self.id)
            .field("files", &self.store.len())
            .field("packages", &self.packages)
            .field("actions", &self.actions)
            .finish()
    }
}
