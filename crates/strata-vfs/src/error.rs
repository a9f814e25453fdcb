use std::io;
use std::path::PathBuf;

use crate::path::FileUri;

/// Errors produced by the file layer.
///
/// The type is `Clone` because a failed read is recorded inside the immutable
/// [`FileHandle`](crate::FileHandle) and handed out to every reader.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VfsError {
    #[error("file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read {path}: {message}")]
    Io {
        path: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },

    #[error("path {path} is not absolute")]
    RelativePath { path: PathBuf },

    #[error("invalid file URI {uri}")]
    InvalidUri { uri: String },

    #[error("{uri} is not open")]
    NotOpen { uri: FileUri },

    #[error("{action} for {uri} carries no content")]
    MissingText { uri: FileUri, action: &'static str },
}

impl VfsError {
    pub(crate) fn from_io(path: impl Into<PathBuf>, err: &io::Error) -> Self {
        let path = path.into();
        if err.kind() == io::ErrorKind::NotFound {
            return VfsError::NotFound { path };
        }
        VfsError::Io {
            path,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VfsError::NotFound { .. })
    }
}
