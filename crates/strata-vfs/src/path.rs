use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::VfsError;

/// Absolute, lexically normalized location of a file.
///
/// Editors address documents with `file://` URIs while watchers and build tools report plain
/// paths; both spellings normalize to the same `FileUri` so they key the same overlay, content
/// store entry and package membership.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileUri(Arc<Path>);

impl FileUri {
    /// Builds a `FileUri` from an absolute local path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, VfsError> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(VfsError::RelativePath {
                path: path.to_path_buf(),
            });
        }
        Ok(Self(Arc::from(normalize_local_path(path))))
    }

    /// Parses either a `file:` URI or an absolute path.
    pub fn parse(raw: &str) -> Result<Self, VfsError> {
        if raw.starts_with("file:") {
            let url = url::Url::parse(raw).map_err(|_| VfsError::InvalidUri {
                uri: raw.to_string(),
            })?;
            let path = url.to_file_path().map_err(|()| VfsError::InvalidUri {
                uri: raw.to_string(),
            })?;
            return Self::from_path(path);
        }
        Self::from_path(raw)
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Directory containing the file.
    pub fn dir(&self) -> &Path {
        self.0.parent().unwrap_or(&self.0)
    }

    /// Returns whether the file lives under `root` (component-wise, not byte-wise).
    pub fn is_under(&self, root: &Path) -> bool {
        self.0.starts_with(root)
    }

    pub fn to_uri_string(&self) -> String {
        match url::Url::from_file_path(&self.0) {
            Ok(url) => url.to_string(),
            Err(()) => format!("file://{}", self.0.display()),
        }
    }
}

impl fmt::Debug for FileUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileUri({})", self.0.display())
    }
}

impl fmt::Display for FileUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for FileUri {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Resolves `.` and `..` without touching the file system or following symlinks.
///
/// `..` never climbs above the root; leading `..` of a relative path are kept.
pub fn normalize_local_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut names = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir if names > 0 => {
                out.pop();
                names -= 1;
            }
            Component::ParentDir => {
                if !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(name) => {
                out.push(name);
                names += 1;
            }
        }
    }
    out
}
