use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::change::{FileAction, FileModification};
use crate::content_store::ContentStore;
use crate::error::VfsError;
use crate::file::{FileHandle, FileIdentity, FileKind, Signature};
use crate::fingerprint::Fingerprint;
use crate::path::FileUri;

/// In-memory content of one editor buffer.
///
/// An overlay is immutable; every edit replaces the table entry with a new value.
#[derive(Debug, Clone)]
pub struct Overlay {
    handle: FileHandle,
    version: i32,
    saved: bool,
}

impl Overlay {
    fn new(uri: FileUri, kind: FileKind, version: i32, text: Arc<[u8]>, saved: bool) -> Self {
        let hash = Fingerprint::from_bytes(&text);
        let identity = FileIdentity::new(uri, Signature::Overlay { version, hash });
        Self {
            handle: FileHandle::new(identity, kind, text),
            version,
            saved,
        }
    }

    pub fn uri(&self) -> &FileUri {
        self.handle.uri()
    }

    pub fn handle(&self) -> &FileHandle {
        &self.handle
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn kind(&self) -> FileKind {
        self.handle.kind()
    }

    /// Whether the buffer matches what is on disk.
    pub fn saved(&self) -> bool {
        self.saved
    }

    fn text(&self) -> Arc<[u8]> {
        // Overlays are always built from text, so the read cannot fail.
        self.handle.read().unwrap_or_else(|_| Arc::from(Vec::new()))
    }
}

/// Per-session table of open editor buffers keyed by file.
#[derive(Debug, Default)]
pub struct OverlayTable {
    inner: Mutex<HashMap<FileUri, Overlay>>,
}

impl OverlayTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[track_caller]
    fn lock_inner(&self) -> MutexGuard<'_, HashMap<FileUri, Overlay>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(err) => {
                let loc = std::panic::Location::caller();
                tracing::error!(
                    target: "strata.vfs",
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

    /// Applies an editor action to the table.
    ///
    /// Returns the overlay now in effect for the file (`None` after a close). On-disk actions
    /// leave the table untouched and return the current overlay, if any.
    ///
    /// `disk` is consulted to decide whether the new buffer matches the saved file. It is read
    /// before the table lock is taken.
    pub fn update(
        &self,
        change: &FileModification,
        kind: FileKind,
        disk: &ContentStore,
    ) -> Result<Option<Overlay>, VfsError> {
        let staged = Staged::prepare(change, kind, disk)?;
        staged.apply(&mut self.lock_inner())
    }

    /// Applies a batch of editor actions as a unit: when any change is rejected the table is
    /// left exactly as it was. On-disk actions in the batch are skipped.
    pub fn update_all<F>(
        &self,
        changes: &[FileModification],
        kind_of: F,
        disk: &ContentStore,
    ) -> Result<(), VfsError>
    where
        F: Fn(&FileUri) -> FileKind,
    {
        let staged = changes
            .iter()
            .filter(|change| !change.action.is_on_disk())
            .map(|change| Staged::prepare(change, kind_of(&change.uri), disk))
            .collect::<Result<Vec<_>, _>>()?;
        if staged.is_empty() {
            return Ok(());
        }

        let mut overlays = self.lock_inner();
        let mut next = overlays.clone();
        for change in staged {
            change.apply(&mut next)?;
        }
        *overlays = next;
        Ok(())
    }

    pub fn get(&self, uri: &FileUri) -> Option<Overlay> {
        self.lock_inner().get(uri).cloned()
    }

    pub fn is_open(&self, uri: &FileUri) -> bool {
        self.lock_inner().contains_key(uri)
    }

    /// Open files under `dir` (direct children only), sorted.
    pub fn files_in(&self, dir: &std::path::Path) -> Vec<FileUri> {
        let mut out: Vec<_> = self
            .lock_inner()
            .keys()
            .filter(|uri| uri.dir() == dir)
            .cloned()
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.lock_inner().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_inner().is_empty()
    }
}

/// An editor action with its disk-dependent inputs already resolved, ready to apply under
/// the table lock.
enum Staged {
    Write {
        uri: FileUri,
        kind: FileKind,
        version: i32,
        text: Arc<[u8]>,
        saved: bool,
        requires_open: bool,
    },
    Save {
        uri: FileUri,
        kind: FileKind,
        text: Option<Arc<[u8]>>,
    },
    Close(FileUri),
    Disk(FileUri),
}

impl Staged {
    fn prepare(
        change: &FileModification,
        kind: FileKind,
        disk: &ContentStore,
    ) -> Result<Self, VfsError> {
        let uri = change.uri.clone();
        let text = change
            .text
            .as_deref()
            .map(|text| Arc::<[u8]>::from(text.as_bytes()));
        Ok(match change.action {
            FileAction::Open | FileAction::Change => {
                let text = text.ok_or_else(|| VfsError::MissingText {
                    uri: uri.clone(),
                    action: change.action.as_str(),
                })?;
                let saved = Fingerprint::from_bytes(&text) == *disk.get_file(&uri, kind).hash();
                Staged::Write {
                    uri,
                    kind,
                    version: change.version,
                    text,
                    saved,
                    requires_open: change.action == FileAction::Change,
                }
            }
            FileAction::Save => Staged::Save { uri, kind, text },
            FileAction::Close => Staged::Close(uri),
            FileAction::Create | FileAction::DiskChange | FileAction::Delete => Staged::Disk(uri),
        })
    }

    fn apply(self, overlays: &mut HashMap<FileUri, Overlay>) -> Result<Option<Overlay>, VfsError> {
        match self {
            Staged::Write {
                uri,
                kind,
                version,
                text,
                saved,
                requires_open,
            } => {
                if requires_open && !overlays.contains_key(&uri) {
                    return Err(VfsError::NotOpen { uri });
                }
                let overlay = Overlay::new(uri.clone(), kind, version, text, saved);
                overlays.insert(uri, overlay.clone());
                Ok(Some(overlay))
            }
            Staged::Save { uri, kind, text } => {
                let current = overlays
                    .get(&uri)
                    .ok_or_else(|| VfsError::NotOpen { uri: uri.clone() })?;
                let text = text.unwrap_or_else(|| current.text());
                let overlay = Overlay::new(uri.clone(), kind, current.version, text, true);
                overlays.insert(uri, overlay.clone());
                Ok(Some(overlay))
            }
            Staged::Close(uri) => {
                overlays.remove(&uri);
                Ok(None)
            }
            Staged::Disk(uri) => Ok(overlays.get(&uri).cloned()),
        }
    }
}
