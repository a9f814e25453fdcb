//! Virtual file system layer for strata.
//!
//! The VFS is responsible for:
//! - Reading files from the OS file system (or an in-memory stand-in for tests).
//! - Content-addressed, identity-keyed caching of file bytes (`ContentStore`).
//! - Providing in-memory overlays (editor buffers) that take precedence over disk.
//! - Representing file modifications delivered by editors and file watchers.

mod change;
mod content_store;
mod error;
mod file;
mod fingerprint;
mod fs;
mod overlay;
mod overlay_fs;
mod path;

pub use change::{FileAction, FileModification};
pub use content_store::ContentStore;
pub use error::VfsError;
pub use file::{FileHandle, FileIdentity, FileKind, Signature};
pub use fingerprint::Fingerprint;
pub use fs::{FileSystem, LocalFs, MemoryFs};
pub use overlay::{Overlay, OverlayTable};
pub use overlay_fs::OverlayFs;
pub use path::{normalize_local_path, FileUri};
