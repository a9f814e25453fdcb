use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::fs::FileSystem;
use crate::overlay::OverlayTable;
use crate::path::FileUri;
use crate::file::Signature;

/// A file system view that serves open editor buffers before delegating to a base file system.
///
/// Build-system queries read through this view so a buffer that was never saved still counts
/// as a member of its directory.
#[derive(Clone)]
pub struct OverlayFs {
    base: Arc<dyn FileSystem>,
    overlays: Arc<OverlayTable>,
}

impl OverlayFs {
    pub fn new(base: Arc<dyn FileSystem>, overlays: Arc<OverlayTable>) -> Self {
        Self { base, overlays }
    }

    pub fn base(&self) -> &Arc<dyn FileSystem> {
        &self.base
    }

    fn overlay_uri(path: &Path) -> Option<FileUri> {
        FileUri::from_path(path).ok()
    }
}

impl std::fmt::Debug for OverlayFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayFs")
            .field("overlays", &self.overlays.len())
            .finish_non_exhaustive()
    }
}

impl FileSystem for OverlayFs {
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        if let Some(overlay) = Self::overlay_uri(path).and_then(|uri| self.overlays.get(&uri)) {
            return overlay
                .handle()
                .read()
                .map(|bytes| bytes.to_vec())
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()));
        }
        self.base.read_bytes(path)
    }

    fn signature(&self, path: &Path) -> io::Result<Signature> {
        if let Some(overlay) = Self::overlay_uri(path).and_then(|uri| self.overlays.get(&uri)) {
            return Ok(overlay.handle().identity().signature.clone());
        }
        self.base.signature(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.base.is_dir(path) || !self.overlays.files_in(path).is_empty()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let open = self.overlays.files_in(path);
        let mut entries = match self.base.read_dir(path) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound && !open.is_empty() => Vec::new(),
            Err(err) => return Err(err),
        };
        entries.extend(open.into_iter().map(|uri| uri.as_path().to_path_buf()));
        entries.sort();
        entries.dedup();
        Ok(entries)
    }
}
