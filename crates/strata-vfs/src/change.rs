use std::fmt;

use crate::path::FileUri;

/// What happened to a file.
///
/// `Open`, `Change`, `Close` and `Save` come from the editor and update the overlay table.
/// `Create`, `DiskChange` and `Delete` come from a file watcher and only describe disk state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileAction {
    Open,
    Change,
    Close,
    Save,
    Create,
    DiskChange,
    Delete,
}

impl FileAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FileAction::Open => "open",
            FileAction::Change => "change",
            FileAction::Close => "close",
            FileAction::Save => "save",
            FileAction::Create => "create",
            FileAction::DiskChange => "disk change",
            FileAction::Delete => "delete",
        }
    }

    /// Whether the action describes on-disk state rather than an editor buffer.
    pub fn is_on_disk(self) -> bool {
        matches!(
            self,
            FileAction::Create | FileAction::DiskChange | FileAction::Delete
        )
    }

    /// Whether the action can add a file to, or remove one from, its directory.
    pub fn changes_file_set(self) -> bool {
        matches!(self, FileAction::Create | FileAction::Delete)
    }
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single modification delivered to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileModification {
    pub uri: FileUri,
    pub action: FileAction,
    /// Editor document version; ignored for on-disk actions.
    pub version: i32,
    /// Full document text for `Open`/`Change` (and optionally `Save`).
    pub text: Option<String>,
}

impl FileModification {
    pub fn open(uri: FileUri, version: i32, text: impl Into<String>) -> Self {
        Self {
            uri,
            action: FileAction::Open,
            version,
            text: Some(text.into()),
        }
    }

    pub fn change(uri: FileUri, version: i32, text: impl Into<String>) -> Self {
        Self {
            uri,
            action: FileAction::Change,
            version,
            text: Some(text.into()),
        }
    }

    pub fn close(uri: FileUri) -> Self {
        Self::bare(uri, FileAction::Close)
    }

    pub fn save(uri: FileUri) -> Self {
        Self::bare(uri, FileAction::Save)
    }

    /// A watcher notification (`Create`, `DiskChange` or `Delete`).
    pub fn on_disk(uri: FileUri, action: FileAction) -> Self {
        debug_assert!(action.is_on_disk(), "{action} is not an on-disk action");
        Self::bare(uri, action)
    }

    fn bare(uri: FileUri, action: FileAction) -> Self {
        Self {
            uri,
            action,
            version: 0,
            text: None,
        }
    }
}
