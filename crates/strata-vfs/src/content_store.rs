use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::VfsError;
use crate::file::{FileHandle, FileIdentity, FileKind, Signature};
use crate::fs::FileSystem;
use crate::path::FileUri;

/// Process-wide, identity-keyed store of on-disk file contents.
///
/// `get_file` stats the file, and returns the cached handle when the identity (path +
/// modification signature) is unchanged. Otherwise it reads the bytes, hashes them and
/// caches the new handle. Only the latest identity per path is kept; snapshots that still
/// hold older handles keep them alive on their own.
pub struct ContentStore {
    fs: Arc<dyn FileSystem>,
    files: Mutex<HashMap<FileUri, FileHandle>>,
}

impl ContentStore {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// The file system this store reads through.
    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn get_file(&self, uri: &FileUri, kind: FileKind) -> FileHandle {
        let signature = match self.fs.signature(uri.as_path()) {
            Ok(signature) => signature,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Signature::Missing,
            Err(err) => {
                // Not cached: the next call may succeed once the condition clears.
                let identity = FileIdentity::new(uri.clone(), Signature::Missing);
                return FileHandle::unreadable(
                    identity,
                    kind,
                    VfsError::from_io(uri.as_path(), &err),
                );
            }
        };
        let identity = FileIdentity::new(uri.clone(), signature);

        if let Some(existing) = self.lookup(&identity) {
            return existing;
        }

        // Read outside the lock; concurrent readers of the same identity race to insert and
        // the first insertion wins so every caller ends up with the same instance.
        let handle = self.read(identity, kind);
        let mut files = self.files.lock();
        match files.get(uri) {
            Some(existing) if existing.identity() == handle.identity() => existing.clone(),
            _ => {
                tracing::trace!(
                    target: "strata.vfs",
                    identity = %handle.identity(),
                    hash = %handle.hash().short(),
                    "cached file contents"
                );
                files.insert(uri.clone(), handle.clone());
                handle
            }
        }
    }

    /// Number of paths with a cached handle.
    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }

    fn lookup(&self, identity: &FileIdentity) -> Option<FileHandle> {
        let files = self.files.lock();
        files
            .get(&identity.uri)
            .filter(|handle| handle.identity() == identity)
            .cloned()
    }

    fn read(&self, identity: FileIdentity, kind: FileKind) -> FileHandle {
        if identity.signature == Signature::Missing {
            let err = VfsError::NotFound {
                path: identity.uri.as_path().to_path_buf(),
            };
            return FileHandle::unreadable(identity, kind, err);
        }
        match self.fs.read_bytes(identity.uri.as_path()) {
            Ok(bytes) => FileHandle::new(identity, kind, Arc::from(bytes)),
            Err(err) => {
                let err = VfsError::from_io(identity.uri.as_path(), &err);
                FileHandle::unreadable(identity, kind, err)
            }
        }
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("files", &self.len())
            .finish_non_exhaustive()
    }
}
