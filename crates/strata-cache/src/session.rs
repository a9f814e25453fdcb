use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use strata_config::Options;
use strata_vfs::{FileAction, FileHandle, FileModification, FileUri, OverlayTable};

use crate::cache::{next_id, Cache};
use crate::error::SessionError;
use crate::snapshot::{Snapshot, ViewContext};
use crate::toolchain::Toolchain;
use crate::view::View;

/// The set of open views plus the editor overlays they all read through.
///
/// A session owns no computation state of its own: every derived result lives in a view's
/// snapshot, and every file version in the overlay table or the cache's content store.
pub struct Session {
    id: u64,
    cache: Arc<Cache>,
    toolchain: Toolchain,
    overlays: Arc<OverlayTable>,
    views: Mutex<Views>,
}

#[derive(Default)]
struct Views {
    list: Vec<Arc<View>>,
    /// Memoized `view_of` answers; cleared whenever `list` changes.
    by_uri: HashMap<FileUri, Arc<View>>,
}

impl Views {
    fn position(&self, view: &Arc<View>) -> Option<usize> {
        self.list.iter().position(|candidate| Arc::ptr_eq(candidate, view))
    }
}

impl Session {
    pub fn new(cache: Arc<Cache>, toolchain: Toolchain) -> Arc<Self> {
        let session = Arc::new(Self {
            id: next_id(),
            cache,
            toolchain,
            overlays: Arc::new(OverlayTable::new()),
            views: Mutex::new(Views::default()),
        });
        tracing::debug!(
            target: "strata.cache",
            session = session.id,
            cache = session.cache.id(),
            "created session"
        );
        session
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    #[track_caller]
    fn lock_views(&self) -> MutexGuard<'_, Views> {
        match self.views.lock() {
            Ok(guard) => guard,
            Err(err) => {
                let loc = std::panic::Location::caller();
                tracing::error!(
                    target: "strata.cache",
                    file = loc.file(),
                    line = loc.line(),
                    column = loc.column(),
                    error = %err,
                    "mutex poisoned; continuing with recovered guard"
                );
                err.into_inner()
            }
        }
    }

    /// Creates a view for `folder`, runs its initial load and registers it.
    ///
    /// Load failures do not fail view creation; they are recorded on the metadata graph.
    pub fn new_view(
        self: &Arc<Self>,
        name: impl Into<String>,
        folder: impl Into<PathBuf>,
        options: Options,
    ) -> Result<(Arc<View>, Arc<Snapshot>), SessionError> {
        let (view, snapshot) = self.create_view(name.into(), folder.into(), options)?;
        let mut views = self.lock_views();
        views.list.push(Arc::clone(&view));
        views.by_uri.clear();
        Ok((view, snapshot))
    }

    fn create_view(
        self: &Arc<Self>,
        name: String,
        folder: PathBuf,
        options: Options,
    ) -> Result<(Arc<View>, Arc<Snapshot>), SessionError> {
        if !folder.is_absolute() {
            return Err(SessionError::RelativeFolder { folder });
        }
        let ctx = ViewContext {
            id: next_id(),
            name,
            folder: strata_vfs::normalize_local_path(&folder),
            options: Arc::new(options),
            toolchain: self.toolchain.clone(),
            cache: Arc::clone(&self.cache),
            overlays: Arc::clone(&self.overlays),
        };
        Ok(View::load(ctx, Arc::downgrade(self)))
    }

    /// Registered views, in registration order.
    pub fn views(&self) -> Vec<Arc<View>> {
        self.lock_views().list.clone()
    }

    pub fn view(&self, name: &str) -> Option<Arc<View>> {
        self.lock_views()
            .list
            .iter()
            .find(|view| view.name() == name)
            .cloned()
    }

    /// The view responsible for `uri`: the one whose folder is the longest prefix of it,
    /// ties going to the view registered first. Files outside every folder go to the first
    /// view. Answers are memoized until the set of views changes.
    pub fn view_of(&self, uri: &FileUri) -> Result<Arc<View>, SessionError> {
        let mut views = self.lock_views();
        if let Some(view) = views.by_uri.get(uri) {
            return Ok(Arc::clone(view));
        }
        let view = best_view(&views.list, uri).ok_or(SessionError::NoViews)?;
        views.by_uri.insert(uri.clone(), Arc::clone(&view));
        Ok(view)
    }

    /// Every view whose folder contains `uri`.
    pub fn views_of(&self, uri: &FileUri) -> Vec<Arc<View>> {
        self.lock_views()
            .list
            .iter()
            .filter(|view| view.contains(uri))
            .cloned()
            .collect()
    }

    /// Unregisters `view` and shuts it down.
    pub fn remove_view(&self, view: &Arc<View>) -> Result<(), SessionError> {
        {
            let mut views = self.lock_views();
            let index = views
                .position(view)
                .ok_or_else(|| view_not_found(view))?;
            views.list.remove(index);
            views.by_uri.clear();
        }
        view.shutdown();
        Ok(())
    }

    /// Replaces `view` with a freshly loaded view using `options`, at the same position.
    pub(crate) fn update_view(
        self: &Arc<Self>,
        view: &Arc<View>,
        options: Options,
    ) -> Result<(Arc<View>, Arc<Snapshot>), SessionError> {
        if self.lock_views().position(view).is_none() {
            return Err(view_not_found(view));
        }

        // Loading can be slow; the view list stays unlocked meanwhile.
        let (replacement, snapshot) =
            self.create_view(view.name().to_string(), view.folder().to_path_buf(), options)?;

        let replaced = {
            let mut views = self.lock_views();
            match views.position(view) {
                Some(index) => {
                    views.list[index] = Arc::clone(&replacement);
                    views.by_uri.clear();
                    true
                }
                None => false,
            }
        };
        if !replaced {
            // Removed while the replacement was loading.
            replacement.shutdown();
            return Err(view_not_found(view));
        }
        view.shutdown();
        tracing::info!(
            target: "strata.cache",
            old = view.id(),
            new = replacement.id(),
            name = %replacement.name(),
            "view options updated"
        );
        Ok((replacement, snapshot))
    }

    /// Shuts down and unregisters every view.
    pub fn shutdown(&self) {
        let views = {
            let mut views = self.lock_views();
            views.by_uri.clear();
            std::mem::take(&mut views.list)
        };
        for view in &views {
            view.shutdown();
        }
        tracing::info!(
            target: "strata.cache",
            session = self.id,
            views = views.len(),
            "session shut down"
        );
    }

    pub fn is_open(&self, uri: &FileUri) -> bool {
        self.overlays.is_open(uri)
    }

    /// The current version of `uri`: the open buffer if there is one, the disk content
    /// otherwise.
    pub fn get_file(&self, uri: &FileUri) -> FileHandle {
        if let Some(overlay) = self.overlays.get(uri) {
            return overlay.handle().clone();
        }
        let kind = self.toolchain.build.file_kind(uri);
        self.cache.content_store().get_file(uri, kind)
    }

    /// Applies an editor or watcher change and returns the new snapshot of every affected
    /// view.
    pub fn did_modify_file(
        &self,
        change: FileModification,
    ) -> Result<Vec<Arc<Snapshot>>, SessionError> {
        self.did_modify_files(vec![change])
    }

    /// Applies a batch of changes. Each affected view derives one snapshot for the whole
    /// batch.
    ///
    /// The batch is routed first, then its editor actions update the overlay table as a unit.
    /// A rejected change (for example an edit of a file that is not open) or a routing failure
    /// aborts the batch with neither overlays nor views touched. A file is delivered to every
    /// view whose folder contains it, or to the best view when none does.
    pub fn did_modify_files(
        &self,
        changes: Vec<FileModification>,
    ) -> Result<Vec<Arc<Snapshot>>, SessionError> {
        let mut routed: Vec<(Arc<View>, Vec<(FileUri, FileAction)>)> = Vec::new();
        for change in &changes {
            let mut targets = self.views_of(&change.uri);
            if targets.is_empty() {
                targets.push(self.view_of(&change.uri)?);
            }
            for view in targets {
                let entry = match routed
                    .iter_mut()
                    .position(|(candidate, _)| Arc::ptr_eq(candidate, &view))
                {
                    Some(index) => &mut routed[index].1,
                    None => {
                        routed.push((view, Vec::new()));
                        let last = routed.len() - 1;
                        &mut routed[last].1
                    }
                };
                entry.push((change.uri.clone(), change.action));
            }
        }

        self.overlays.update_all(
            &changes,
            |uri| self.toolchain.build.file_kind(uri),
            self.cache.content_store(),
        )?;

        let mut snapshots = Vec::with_capacity(routed.len());
        for (view, changes) in routed {
            match view.invalidate(&changes) {
                Ok(snapshot) => snapshots.push(snapshot),
                // Shut down concurrently; the change is moot for it.
                Err(SessionError::ViewShutdown { name }) => tracing::debug!(
                    target: "strata.cache",
                    view = %name,
                    "skipping change for shut down view"
                ),
                Err(err) => return Err(err),
            }
        }
        Ok(snapshots)
    }

    /// Invalidates the best view for a change made outside the editor (a watcher event),
    /// without touching overlays. Returns `false` when no view could take the change.
    pub fn did_change_out_of_band(&self, uri: &FileUri, action: FileAction) -> bool {
        let Ok(view) = self.view_of(uri) else {
            return false;
        };
        match view.invalidate(&[(uri.clone(), action)]) {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(
                    target: "strata.cache",
                    uri = %uri,
                    error = %err,
                    "out-of-band change not applied"
                );
                false
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let views = self.lock_views();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("views", &views.list)
            .field("overlays", &self.overlays.len())
            .finish()
    }
}

fn view_not_found(view: &View) -> SessionError {
    SessionError::ViewNotFound {
        name: view.name().to_string(),
        folder: view.folder().to_path_buf(),
    }
}

/// Longest folder prefix wins; ties keep the earliest view; no match falls back to the first.
fn best_view(views: &[Arc<View>], uri: &FileUri) -> Option<Arc<View>> {
    let mut best: Option<(&Arc<View>, usize)> = None;
    for view in views {
        if !view.contains(uri) {
            continue;
        }
        let depth = view.folder().components().count();
        if best.map_or(true, |(_, best_depth)| depth > best_depth) {
            best = Some((view, depth));
        }
    }
    best.map(|(view, _)| view)
        .or_else(|| views.first())
        .cloned()
}
