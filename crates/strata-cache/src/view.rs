use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use strata_config::Options;
use strata_vfs::{FileAction, FileSystem, FileUri};
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;
use crate::metadata::MetadataGraph;
use crate::session::Session;
use crate::snapshot::{Snapshot, ViewContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// Running the initial load.
    Initializing,
    Ready,
    /// Terminal: background work cancelled, snapshot released.
    Shutdown,
}

/// One workspace folder with its own options and snapshot history.
pub struct View {
    ctx: Arc<ViewContext>,
    session: Weak<Session>,
    state: Mutex<ViewState>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    background: CancellationToken,
}

impl View {
    /// Creates the view and runs its initial load.
    pub(crate) fn load(ctx: ViewContext, session: Weak<Session>) -> (Arc<View>, Arc<Snapshot>) {
        let ctx = Arc::new(ctx);
        let view = Arc::new(View {
            ctx: Arc::clone(&ctx),
            session,
            state: Mutex::new(ViewState::Initializing),
            snapshot: RwLock::new(None),
            background: CancellationToken::new(),
        });

        let fs = ctx.overlay_fs();
        let mut dirs = workspace_dirs(&fs, &ctx.folder);
        for root in ctx.toolchain.build.dependency_dirs(&ctx.folder, &ctx.options) {
            if !root.starts_with(&ctx.folder) {
                dirs.extend(workspace_dirs(&fs, &root));
            }
        }
        let (metadata, _) = MetadataGraph::new().with_dir_results(ctx.query_dirs(dirs));
        let failed = metadata
            .packages()
            .filter(|node| node.load_error.is_some())
            .count();
        let snapshot = Arc::new(Snapshot::initial(Arc::clone(&ctx), metadata));

        *view.snapshot.write() = Some(Arc::clone(&snapshot));
        *view.state.lock() = ViewState::Ready;
        tracing::info!(
            target: "strata.cache",
            view = ctx.id,
            name = %ctx.name,
            folder = %ctx.folder.display(),
            packages = snapshot.metadata().len(),
            failed,
            "view loaded"
        );

        view.preload(&snapshot);
        (view, snapshot)
    }

    pub fn id(&self) -> u64 {
        self.ctx.id
    }

    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    pub fn folder(&self) -> &Path {
        &self.ctx.folder
    }

    pub fn options(&self) -> Arc<Options> {
        Arc::clone(&self.ctx.options)
    }

    pub fn state(&self) -> ViewState {
        *self.state.lock()
    }

    /// Whether `uri` lies under this view's folder.
    pub fn contains(&self, uri: &FileUri) -> bool {
        uri.is_under(&self.ctx.folder)
    }

    /// The current snapshot. Callers that need a consistent state across several reads must
    /// hold on to the returned snapshot rather than calling this again.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>, SessionError> {
        self.snapshot
            .read()
            .clone()
            .ok_or_else(|| SessionError::ViewShutdown {
                name: self.ctx.name.clone(),
            })
    }

    /// Replaces the view's options.
    ///
    /// Options can change package resolution itself, so this rebuilds everything: the session
    /// swaps in a freshly loaded view at the same position and shuts this one down.
    pub fn set_options(
        self: &Arc<Self>,
        options: Options,
    ) -> Result<(Arc<View>, Arc<Snapshot>), SessionError> {
        let session = self.session.upgrade().ok_or_else(|| SessionError::SessionClosed {
            name: self.ctx.name.clone(),
        })?;
        session.update_view(self, options)
    }

    /// Derives and installs a new snapshot reflecting `changes`.
    ///
    /// The successor is derived without holding the snapshot lock. If another invalidation
    /// installed a snapshot in the meantime, the work is redone on top of it.
    pub(crate) fn invalidate(
        &self,
        changes: &[(FileUri, FileAction)],
    ) -> Result<Arc<Snapshot>, SessionError> {
        loop {
            let base = self.snapshot()?;
            let next = Arc::new(base.clone_with(changes));

            let mut current = self.snapshot.write();
            let Some(installed) = current.as_ref() else {
                return Err(SessionError::ViewShutdown {
                    name: self.ctx.name.clone(),
                });
            };
            if !Arc::ptr_eq(installed, &base) {
                drop(current);
                tracing::trace!(
                    target: "strata.cache",
                    view = self.ctx.id,
                    "snapshot replaced concurrently; deriving again"
                );
                continue;
            }
            *current = Some(Arc::clone(&next));
            drop(current);
            tracing::debug!(
                target: "strata.cache",
                view = self.ctx.id,
                generation = next.generation(),
                "installed snapshot"
            );
            return Ok(next);
        }
    }

    /// Cancels background work and releases the current snapshot. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state == ViewState::Shutdown {
                return;
            }
            *state = ViewState::Shutdown;
        }
        self.background.cancel();
        self.snapshot.write().take();
        tracing::info!(
            target: "strata.cache",
            view = self.ctx.id,
            name = %self.ctx.name,
            "view shut down"
        );
    }

    /// Warms every workspace package in a detached task governed by the view's background
    /// token. Does nothing outside a tokio runtime.
    fn preload(&self, snapshot: &Arc<Snapshot>) {
        if !self.ctx.options.preload_workspace {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(
                target: "strata.cache",
                view = self.ctx.id,
                "no runtime available; skipping workspace preload"
            );
            return;
        };

        let snapshot = Arc::clone(snapshot);
        let token = self.background.clone();
        runtime.spawn(async move {
            for id in snapshot.workspace_packages() {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    result = snapshot.check_package(&id, &token) => {
                        if let Err(err) = result {
                            tracing::debug!(
                                target: "strata.cache",
                                package = %id,
                                error = %err,
                                "preload failed"
                            );
                        }
                    }
                }
            }
            tracing::debug!(
                target: "strata.cache",
                view = snapshot.view_id(),
                generation = snapshot.generation(),
                "workspace preload finished"
            );
        });
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("id", &self.ctx.id)
            .field("name", &self.ctx.name)
            .field("folder", &self.ctx.folder)
            .field("state", &self.state())
            .finish()
    }
}

/// Every directory under `folder` (inclusive), skipping hidden ones, in sorted order.
fn workspace_dirs(fs: &dyn FileSystem, folder: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let mut stack = vec![folder.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs.read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(
                    target: "strata.cache",
                    dir = %dir.display(),
                    error = %err,
                    "failed to list directory"
                );
                dirs.push(dir);
                continue;
            }
        };
        for entry in entries {
            let hidden = entry
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with('.'));
            if !hidden && fs.is_dir(&entry) {
                stack.push(entry);
            }
        }
        dirs.push(dir);
    }
    dirs.sort();
    dirs
}
