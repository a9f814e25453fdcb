use std::fmt;
use std::sync::Arc;

use crate::error::VfsError;
use crate::fingerprint::Fingerprint;
use crate::path::FileUri;

/// Coarse classification of a file, decided by the build system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FileKind {
    /// A file that belongs to a package and is fed to the type checker.
    #[default]
    Source,
    /// A build manifest; changing it can change package resolution itself.
    Manifest,
    Other,
}

/// Modification signature of one file version.
///
/// A signature changes on every disk write (size/mtime) and on every overlay edit (version and
/// content hash). Two identities are equal only when both the path and the signature match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Signature {
    Disk { modified_nanos: u128, len: u64 },
    Overlay { version: i32, hash: Fingerprint },
    Missing,
}

/// `(path, modification signature)` pair that keys the content store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub uri: FileUri,
    pub signature: Signature,
}

impl FileIdentity {
    pub fn new(uri: FileUri, signature: Signature) -> Self {
        Self { uri, signature }
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.signature {
            Signature::Disk {
                modified_nanos,
                len,
            } => write!(f, "{}@disk:{modified_nanos}:{len}", self.uri),
            Signature::Overlay { version, hash } => {
                write!(f, "{}@overlay:v{version}:{}", self.uri, hash.short())
            }
            Signature::Missing => write!(f, "{}@missing", self.uri),
        }
    }
}

/// Immutable identity + content + hash triple for one file at one point in time.
///
/// Handles are cheap to clone and never mutated; a new version of a file is a new handle.
/// Read failures are captured in the handle so every reader observes the same outcome.
#[derive(Clone)]
pub struct FileHandle(Arc<FileHandleData>);

struct FileHandleData {
    identity: FileIdentity,
    kind: FileKind,
    content: Result<Arc<[u8]>, VfsError>,
    hash: Fingerprint,
}

impl FileHandle {
    pub fn new(identity: FileIdentity, kind: FileKind, content: Arc<[u8]>) -> Self {
        let hash = Fingerprint::from_bytes(&content);
        Self(Arc::new(FileHandleData {
            identity,
            kind,
            content: Ok(content),
            hash,
        }))
    }

    pub fn unreadable(identity: FileIdentity, kind: FileKind, err: VfsError) -> Self {
        // Distinct from the hash of any real content, including the empty file.
        let hash = Fingerprint::from_parts([b"unreadable".as_slice(), err.to_string().as_bytes()]);
        Self(Arc::new(FileHandleData {
            identity,
            kind,
            content: Err(err),
            hash,
        }))
    }

    pub fn identity(&self) -> &FileIdentity {
        &self.0.identity
    }

    pub fn uri(&self) -> &FileUri {
        &self.0.identity.uri
    }

    pub fn kind(&self) -> FileKind {
        self.0.kind
    }

    pub fn hash(&self) -> &Fingerprint {
        &self.0.hash
    }

    pub fn read(&self) -> Result<Arc<[u8]>, VfsError> {
        self.0.content.clone()
    }

    /// Whether the file could be read (it exists and was accessible).
    pub fn exists(&self) -> bool {
        self.0.content.is_ok()
    }

    /// Returns whether both handles are the same instance.
    pub fn ptr_eq(a: &FileHandle, b: &FileHandle) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("identity", &self.0.identity)
            .field("kind", &self.0.kind)
            .field("hash", &self.0.hash.short())
            .field("exists", &self.exists())
            .finish()
    }
}
