use std::sync::Arc;

use strata_cache::{
    Cache, CancellationToken, CheckError, CheckedPackage, FileAction, FileModification, Options,
    PackageId, Session, Snapshot, View,
};
use strata_test_utils::{uri, FakeToolchain, Fixture};
use strata_vfs::{FileSystem, MemoryFs};

mod actions;
mod invalidation;
mod lifecycle;
mod load_errors;
mod local_fs;
mod routing;

/// Options without the background preload, so checker call counts are deterministic.
pub(crate) fn quiet() -> Options {
    Options {
        preload_workspace: false,
        ..Options::default()
    }
}

pub(crate) fn id(id: &str) -> PackageId {
    PackageId::new(id)
}

/// An in-memory workspace driven through a session.
pub(crate) struct Workspace {
    pub fs: Arc<MemoryFs>,
    pub fakes: FakeToolchain,
    pub session: Arc<Session>,
}

impl Workspace {
    pub fn new(fixture: &str) -> Self {
        Self::with_fakes(fixture, FakeToolchain::new())
    }

    pub fn with_fakes(fixture: &str, fakes: FakeToolchain) -> Self {
        let fs = Fixture::parse(fixture).memory_fs();
        let cache = Cache::new(fs.clone());
        let session = Session::new(cache, fakes.toolchain());
        Self { fs, fakes, session }
    }

    pub fn view(&self, name: &str, folder: &str) -> (Arc<View>, Arc<Snapshot>) {
        self.session
            .new_view(name, folder, quiet())
            .expect("view should load")
    }

    /// Writes `text` to disk and notifies the session like a file watcher would.
    pub fn write(&self, path: &str, text: &str) -> Vec<Arc<Snapshot>> {
        let action = if self.fs.exists(std::path::Path::new(path)) {
            FileAction::DiskChange
        } else {
            FileAction::Create
        };
        self.fs.write(path, text);
        self.session
            .did_modify_file(FileModification::on_disk(uri(path), action))
            .expect("disk change should apply")
    }
}

pub(crate) async fn check(
    snapshot: &Snapshot,
    package: &str,
) -> Result<Arc<CheckedPackage>, CheckError> {
    snapshot
        .check_package(&id(package), &CancellationToken::new())
        .await
}
