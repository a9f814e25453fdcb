use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use strata_config::Options;
use strata_vfs::{FileAction, FileHandle, FileKind, FileUri, OverlayFs, OverlayTable};
use tokio_util::sync::CancellationToken;

use crate::action::{run_action, ActionHandle, ActionInputs, ActionKey, ActionResult};
use crate::cache::Cache;
use crate::error::{AnalysisError, CheckError};
use crate::metadata::{DirResult, MetadataGraph, PackageId};
use crate::package::{check_package, CheckMode, CheckedPackage, DepSlot, PackageHandle, PackageInputs, PackageKey};
use crate::toolchain::{Analyzer, LoadRequest, Toolchain};

/// Immutable per-view state shared by every snapshot of the view.
pub(crate) struct ViewContext {
    pub id: u64,
    pub name: String,
    pub folder: PathBuf,
    pub options: Arc<Options>,
    pub toolchain: Toolchain,
    pub cache: Arc<Cache>,
    pub overlays: Arc<OverlayTable>,
}

impl ViewContext {
    /// Current version of `uri`: the open buffer if there is one, the disk content otherwise.
    pub(crate) fn read_file(&self, uri: &FileUri) -> FileHandle {
        if let Some(overlay) = self.overlays.get(uri) {
            return overlay.handle().clone();
        }
        let kind = self.toolchain.build.file_kind(uri);
        self.cache.content_store().get_file(uri, kind)
    }

    pub(crate) fn overlay_fs(&self) -> OverlayFs {
        OverlayFs::new(Arc::clone(self.cache.fs()), Arc::clone(&self.overlays))
    }

    pub(crate) fn query_dirs(&self, dirs: impl IntoIterator<Item = PathBuf>) -> Vec<DirResult> {
        let fs = self.overlay_fs();
        dirs.into_iter()
            .map(|dir| {
                let request = LoadRequest {
                    dir: &dir,
                    folder: &self.folder,
                    fs: &fs,
                    options: &self.options,
                };
                let result = self.toolchain.build.query(&request);
                (dir, result)
            })
            .collect()
    }

    fn mode_for(&self, dir: &Path) -> CheckMode {
        if dir.starts_with(&self.folder) {
            CheckMode::Full
        } else {
            CheckMode::Exported
        }
    }
}

type ActionSlot = (PackageId, Arc<str>);

/// An immutable, point-in-time view of one workspace.
///
/// The package, action and file maps are filled when the snapshot is built and never change
/// afterwards, so readers need no lock. The one exception is the pin table for files outside
/// every package: the first read of such a file records its handle, and later reads return
/// that same handle. Deriving a successor shares every entry outside the invalidated slice
/// through the persistent maps.
pub struct Snapshot {
    ctx: Arc<ViewContext>,
    generation: u64,
    metadata: Arc<MetadataGraph>,
    files: im::HashMap<FileUri, FileHandle>,
    packages: im::HashMap<PackageId, Arc<PackageHandle>>,
    actions: im::HashMap<ActionSlot, Arc<ActionHandle>>,
    /// Files outside every package, pinned on first read so repeated reads agree.
    unowned: Mutex<HashMap<FileUri, FileHandle>>,
}

impl Snapshot {
    pub(crate) fn initial(ctx: Arc<ViewContext>, metadata: MetadataGraph) -> Self {
        let mut files = im::HashMap::new();
        let ids: Vec<PackageId> = metadata.package_ids().cloned().collect();
        let (packages, actions) = Builder::new(
            &ctx,
            &metadata,
            &mut files,
            im::HashMap::new(),
            im::HashMap::new(),
        )
        .build(&ids);

        tracing::debug!(
            target: "strata.cache",
            view = ctx.id,
            packages = packages.len(),
            actions = actions.len(),
            "built initial snapshot"
        );
        Self {
            ctx,
            generation: 0,
            metadata: Arc::new(metadata),
            files,
            packages,
            actions,
            unowned: Mutex::new(HashMap::new()),
        }
    }

    /// Derives the successor snapshot after `changes`.
    ///
    /// Only the packages containing a changed file, the packages whose node changed in a
    /// re-queried directory, and everything importing them (transitively) get new handles.
    /// Every other handle is carried over as is.
    pub(crate) fn clone_with(&self, changes: &[(FileUri, FileAction)]) -> Snapshot {
        let ctx = &self.ctx;
        let build = &ctx.toolchain.build;

        let mut updated: Vec<(FileUri, FileHandle)> = Vec::new();
        let mut direct: BTreeSet<PackageId> = BTreeSet::new();
        let mut requery: BTreeSet<PathBuf> = BTreeSet::new();
        let mut requery_all = false;

        for (uri, action) in changes {
            let new = ctx.read_file(uri);
            let old = self
                .files
                .get(uri)
                .cloned()
                .or_else(|| self.unowned.lock().get(uri).cloned());
            if let Some(old) = &old {
                if old.identity() == new.identity() && old.hash() == new.hash() {
                    continue;
                }
            }

            let ids = self.metadata.ids_for_file(uri);
            direct.extend(ids.iter().cloned());

            let dir = uri.dir().to_path_buf();
            let existed = old.as_ref().is_some_and(FileHandle::exists);
            let file_set_changed = action.changes_file_set() || existed != new.exists();
            let orphaned = ids.is_empty()
                && new.kind() == FileKind::Source
                && new.exists()
                && uri.is_under(&ctx.folder);
            let load_failed = ids
                .iter()
                .chain(self.metadata.packages_in_dir(&dir))
                .filter_map(|id| self.metadata.get(id))
                .any(|node| node.load_error.is_some());
            let structure_changed = old
                .as_ref()
                .is_some_and(|old| build.invalidates_metadata(old, &new));

            if new.kind() == FileKind::Manifest {
                requery_all = true;
            }
            if file_set_changed || orphaned || load_failed || structure_changed {
                requery.insert(dir);
            }
            updated.push((uri.clone(), new));
        }

        if requery_all {
            requery.extend(self.metadata.dirs().map(Path::to_path_buf));
        }
        let requeried = requery.len();
        let mut changed_nodes = BTreeSet::new();
        let metadata = if requery.is_empty() {
            Arc::clone(&self.metadata)
        } else {
            let (graph, changed) = self.metadata.with_dir_results(ctx.query_dirs(requery));
            changed_nodes = changed;
            direct.extend(changed_nodes.iter().cloned());
            Arc::new(graph)
        };

        let mut files = self.files.clone();
        for (uri, handle) in updated {
            let owners = metadata.ids_for_file(&uri);
            direct.extend(owners.iter().cloned());
            if owners.is_empty() {
                files.remove(&uri);
            } else {
                files.insert(uri, handle);
            }
        }
        // Files that only a changed node listed and no current package owns.
        for id in &changed_nodes {
            let Some(old) = self.metadata.get(id) else {
                continue;
            };
            for uri in &old.files {
                if metadata.ids_for_file(uri).is_empty() {
                    files.remove(uri);
                }
            }
        }

        let mut invalidated = self.metadata.reverse_closure(&direct);
        invalidated.extend(metadata.reverse_closure(&direct));

        let analyzers: Vec<Arc<str>> = ctx
            .toolchain
            .enabled_analyzers(&ctx.options)
            .map(|analyzer| Arc::from(analyzer.name()))
            .collect();
        let mut packages = self.packages.clone();
        let mut actions = self.actions.clone();
        for id in &invalidated {
            packages.remove(id);
            for name in &analyzers {
                actions.remove(&(id.clone(), Arc::clone(name)));
            }
        }

        let rebuild: Vec<PackageId> = invalidated
            .iter()
            .filter(|id| metadata.contains(id))
            .cloned()
            .collect();
        let (packages, actions) =
            Builder::new(ctx, &metadata, &mut files, packages, actions).build(&rebuild);

        let generation = self.generation + 1;
        tracing::debug!(
            target: "strata.cache",
            view = ctx.id,
            generation,
            changes = changes.len(),
            invalidated = invalidated.len(),
            requeried,
            "derived snapshot"
        );
        Snapshot {
            ctx: Arc::clone(ctx),
            generation,
            metadata,
            files,
            packages,
            actions,
            unowned: Mutex::new(HashMap::new()),
        }
    }

    /// Position of this snapshot in its view's history; strictly increasing.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn view_id(&self) -> u64 {
        self.ctx.id
    }

    pub fn view_name(&self) -> &str {
        &self.ctx.name
    }

    pub fn folder(&self) -> &Path {
        &self.ctx.folder
    }

    pub fn options(&self) -> &Arc<Options> {
        &self.ctx.options
    }

    pub fn metadata(&self) -> &Arc<MetadataGraph> {
        &self.metadata
    }

    /// The version of `uri` this snapshot observes.
    ///
    /// Read failures are carried by the returned handle (see [`FileHandle::read`]).
    pub fn get_file(&self, uri: &FileUri) -> FileHandle {
        if let Some(handle) = self.files.get(uri) {
            return handle.clone();
        }
        if let Some(handle) = self.unowned.lock().get(uri) {
            return handle.clone();
        }
        let handle = self.ctx.read_file(uri);
        self.unowned
            .lock()
            .entry(uri.clone())
            .or_insert(handle)
            .clone()
    }

    pub fn package_ids_for_file(&self, uri: &FileUri) -> Vec<PackageId> {
        self.metadata.ids_for_file(uri).to_vec()
    }

    /// Packages whose directory lies under the view folder.
    pub fn workspace_packages(&self) -> Vec<PackageId> {
        self.metadata
            .packages()
            .filter(|node| self.ctx.mode_for(&node.dir) == CheckMode::Full)
            .map(|node| node.id.clone())
            .collect()
    }

    pub fn package_handle(&self, id: &PackageId) -> Option<Arc<PackageHandle>> {
        self.packages.get(id).cloned()
    }

    pub fn package_key(&self, id: &PackageId) -> Option<PackageKey> {
        self.packages.get(id).map(|handle| handle.key().clone())
    }

    /// Type-checks `id`, computing it or joining an in-flight computation.
    pub async fn check_package(
        &self,
        id: &PackageId,
        cancel: &CancellationToken,
    ) -> Result<Arc<CheckedPackage>, CheckError> {
        let handle = self
            .packages
            .get(id)
            .ok_or_else(|| CheckError::UnknownPackage {
                package: id.clone(),
            })?;
        handle
            .get(cancel)
            .await
            .map_err(|err| CheckError::from_handle(id, err))
    }

    pub fn action_handle(&self, id: &PackageId, analyzer: &str) -> Option<Arc<ActionHandle>> {
        self.actions.get(&(id.clone(), Arc::from(analyzer))).cloned()
    }

    /// Runs one analyzer over `id`.
    pub async fn analyze_with(
        &self,
        id: &PackageId,
        analyzer: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<ActionResult>, AnalysisError> {
        if !self.metadata.contains(id) {
            return Err(CheckError::UnknownPackage {
                package: id.clone(),
            }
            .into());
        }
        let handle =
            self.action_handle(id, analyzer)
                .ok_or_else(|| AnalysisError::UnknownAnalyzer {
                    analyzer: analyzer.to_string(),
                })?;
        handle
            .get(cancel)
            .await
            .map_err(|err| AnalysisError::from_handle(analyzer, id, err))
    }

    /// Runs every enabled analyzer over `id`, in registration order. A failing analyzer does
    /// not hide the results of the others.
    pub async fn analyze(
        &self,
        id: &PackageId,
        cancel: &CancellationToken,
    ) -> Vec<Result<Arc<ActionResult>, AnalysisError>> {
        let names: Vec<String> = self
            .ctx
            .toolchain
            .enabled_analyzers(&self.ctx.options)
            .map(|analyzer| analyzer.name().to_string())
            .collect();
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            out.push(self.analyze_with(id, &name, cancel).await);
        }
        out
    }

    /// Forgets cached failures of `id`, of every package importing it and of their actions,
    /// so the next request recomputes them. Returns how many handles were reset.
    pub fn retry_package(&self, id: &PackageId) -> usize {
        let affected = self.metadata.reverse_closure([id]);
        let mut reset = 0;
        for package in &affected {
            if let Some(handle) = self.packages.get(package) {
                reset += usize::from(handle.force_retry());
            }
        }
        for ((package, _), handle) in &self.actions {
            if affected.contains(package) {
                reset += usize::from(handle.force_retry());
            }
        }
        if reset > 0 {
            tracing::debug!(
                target: "strata.cache",
                view = self.ctx.id,
                generation = self.generation,
                package = %id,
                reset,
                "retrying failed handles"
            );
        }
        reset
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("view", &self.ctx.name)
            .field("generation", &self.generation)
            .field("packages", &self.packages.len())
            .field("actions", &self.actions.len())
            .field("files", &self.files.len())
            .finish()
    }
}

/// Binds the package and action handles missing from a snapshot under construction.
struct Builder<'a> {
    ctx: &'a ViewContext,
    metadata: &'a MetadataGraph,
    files: &'a mut im::HashMap<FileUri, FileHandle>,
    packages: im::HashMap<PackageId, Arc<PackageHandle>>,
    actions: im::HashMap<ActionSlot, Arc<ActionHandle>>,
    visiting: HashSet<PackageId>,
    build_fingerprint: Vec<u8>,
}

impl<'a> Builder<'a> {
    fn new(
        ctx: &'a ViewContext,
        metadata: &'a MetadataGraph,
        files: &'a mut im::HashMap<FileUri, FileHandle>,
        packages: im::HashMap<PackageId, Arc<PackageHandle>>,
        actions: im::HashMap<ActionSlot, Arc<ActionHandle>>,
    ) -> Self {
        Self {
            build_fingerprint: ctx.options.build_fingerprint(),
            ctx,
            metadata,
            files,
            packages,
            actions,
            visiting: HashSet::new(),
        }
    }

    /// Binds handles for `ids`. Dependencies outside `ids` resolve to the handles already in
    /// the maps, or are bound on demand when absent.
    fn build(
        mut self,
        ids: &[PackageId],
    ) -> (
        im::HashMap<PackageId, Arc<PackageHandle>>,
        im::HashMap<ActionSlot, Arc<ActionHandle>>,
    ) {
        for id in ids {
            self.package(id);
        }

        let analyzers: Vec<Arc<dyn Analyzer>> = self
            .ctx
            .toolchain
            .enabled_analyzers(&self.ctx.options)
            .cloned()
            .collect();
        for analyzer in &analyzers {
            for id in ids {
                self.action(id, analyzer);
            }
        }
        (self.packages, self.actions)
    }

    fn file(&mut self, uri: &FileUri) -> FileHandle {
        if let Some(handle) = self.files.get(uri) {
            return handle.clone();
        }
        let handle = self.ctx.read_file(uri);
        self.files.insert(uri.clone(), handle.clone());
        handle
    }

    fn package(&mut self, id: &PackageId) -> DepSlot {
        if let Some(handle) = self.packages.get(id) {
            return DepSlot::Ready(Arc::clone(handle));
        }
        let Some(node) = self.metadata.get(id).cloned() else {
            return DepSlot::Missing;
        };
        if !self.visiting.insert(id.clone()) {
            return DepSlot::Cycle;
        }
        let deps: Vec<(PackageId, DepSlot)> = node
            .imports
            .iter()
            .map(|import| (import.clone(), self.package(import)))
            .collect();
        self.visiting.remove(id);

        let files = node.files.iter().map(|uri| self.file(uri)).collect();
        let inputs = Arc::new(PackageInputs {
            mode: self.ctx.mode_for(&node.dir),
            node,
            files,
            deps,
            checker: Arc::clone(&self.ctx.toolchain.checker),
        });
        let key = inputs.key(&self.build_fingerprint);
        let handle = self
            .ctx
            .cache
            .packages
            .bind(key, move |token| check_package(Arc::clone(&inputs), token));
        self.packages.insert(id.clone(), Arc::clone(&handle));
        DepSlot::Ready(handle)
    }

    fn action(&mut self, id: &PackageId, analyzer: &Arc<dyn Analyzer>) -> Option<Arc<ActionHandle>> {
        let name: Arc<str> = Arc::from(analyzer.name());
        let slot = (id.clone(), Arc::clone(&name));
        if let Some(handle) = self.actions.get(&slot) {
            return Some(Arc::clone(handle));
        }
        let package = Arc::clone(self.packages.get(id)?);
        let node = Arc::clone(self.metadata.get(id)?);
        if !self.visiting.insert(id.clone()) {
            return None;
        }
        let mut deps = Vec::new();
        if analyzer.uses_facts() {
            for import in &node.imports {
                if let Some(handle) = self.action(import, analyzer) {
                    deps.push((import.clone(), handle));
                }
            }
        }
        self.visiting.remove(id);

        let files = node.files.iter().map(|uri| self.file(uri)).collect();
        let key = ActionKey {
            package: package.key().clone(),
            analyzer: Arc::clone(&name),
        };
        let inputs = Arc::new(ActionInputs {
            analyzer: Arc::clone(analyzer),
            name,
            node,
            package,
            files,
            deps,
        });
        let handle = self
            .ctx
            .cache
            .actions
            .bind(key, move |token| run_action(Arc::clone(&inputs), token));
        self.actions.insert(slot, Arc::clone(&handle));
        Some(handle)
    }
}
