use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use parking_lot::RwLock;

use crate::file::Signature;

/// File system abstraction for strata.
///
/// The trait is intentionally small so it can be implemented for different
/// backends (local FS, overlays, in-memory fixtures).
pub trait FileSystem: Send + Sync {
    /// Reads the file contents as raw bytes.
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Returns the current modification signature of a file.
    fn signature(&self, path: &Path) -> io::Result<Signature>;

    /// Returns whether a file exists.
    fn exists(&self, path: &Path) -> bool {
        self.signature(path).is_ok()
    }

    /// Returns whether a path names a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Lists the immediate entries (files and directories) of a directory, sorted.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

impl<F: FileSystem + ?Sized> FileSystem for Arc<F> {
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        (**self).read_bytes(path)
    }

    fn signature(&self, path: &Path) -> io::Result<Signature> {
        (**self).signature(path)
    }

    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        (**self).is_dir(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        (**self).read_dir(path)
    }
}

/// Local OS file system implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for LocalFs {
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn signature(&self, path: &Path) -> io::Result<Signature> {
        let meta = fs::metadata(path)?;
        if meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is a directory", path.display()),
            ));
        }
        let modified_nanos = match meta.modified() {
            Ok(time) => time
                .duration_since(UNIX_EPOCH)
                .map(|dur| dur.as_nanos())
                .unwrap_or(0),
            Err(err) => {
                tracing::debug!(
                    target: "strata.vfs",
                    path = %path.display(),
                    error = %err,
                    "failed to read file mtime; using 0 for the file signature"
                );
                0
            }
        };
        Ok(Signature::Disk {
            modified_nanos,
            len: meta.len(),
        })
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            out.push(entry.path());
        }
        out.sort();
        Ok(out)
    }
}

/// In-memory file system with deterministic signatures.
///
/// Every write bumps a logical clock that stands in for the mtime, so two writes of the same
/// bytes still produce distinct identities, like two saves on a real disk would.
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: RwLock<BTreeMap<PathBuf, MemoryFile>>,
    clock: AtomicU64,
}

#[derive(Debug, Clone)]
struct MemoryFile {
    bytes: Arc<[u8]>,
    stamp: u64,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, path: impl Into<PathBuf>, bytes: impl AsRef<[u8]>) {
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        self.files.write().insert(
            path.into(),
            MemoryFile {
                bytes: Arc::from(bytes.as_ref()),
                stamp,
            },
        );
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.files.write().remove(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl FileSystem for MemoryFs {
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .read()
            .get(path)
            .map(|file| file.bytes.to_vec())
            .ok_or_else(|| not_found(path))
    }

    fn signature(&self, path: &Path) -> io::Result<Signature> {
        self.files
            .read()
            .get(path)
            .map(|file| Signature::Disk {
                modified_nanos: u128::from(file.stamp),
                len: file.bytes.len() as u64,
            })
            .ok_or_else(|| not_found(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let files = self.files.read();
        files
            .range(path.to_path_buf()..)
            .take_while(|(candidate, _)| candidate.starts_with(path))
            .any(|(candidate, _)| candidate != path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let files = self.files.read();
        let mut out = Vec::new();
        for (candidate, _) in files
            .range(path.to_path_buf()..)
            .take_while(|(candidate, _)| candidate.starts_with(path))
        {
            let Ok(rest) = candidate.strip_prefix(path) else {
                continue;
            };
            let Some(first) = rest.components().next() else {
                continue;
            };
            let child = path.join(first);
            if out.last() != Some(&child) {
                out.push(child);
            }
        }
        if out.is_empty() {
            return Err(not_found(path));
        }
        out.sort();
        out.dedup();
        Ok(out)
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}
