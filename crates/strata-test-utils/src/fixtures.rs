use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_vfs::{FileUri, MemoryFs};

/// Parses an absolute fixture path into a [`FileUri`].
///
/// Panics on relative paths; fixtures always spell out absolute locations.
#[must_use]
pub fn uri(path: &str) -> FileUri {
    FileUri::parse(path).unwrap_or_else(|err| panic!("invalid fixture path {path:?}: {err}"))
}

/// A multi-file workspace written as one string.
///
/// Each file starts with a `//- /absolute/path` line; everything up to the next marker is
/// its content. Lines are trimmed and blank lines dropped.
#[derive(Debug, Clone, Default)]
pub struct Fixture {
    files: BTreeMap<PathBuf, String>,
}

impl Fixture {
    #[must_use]
    pub fn parse(fixture: &str) -> Self {
        let mut files = BTreeMap::new();
        let mut current_path: Option<PathBuf> = None;
        let mut current_text = String::new();

        for line in fixture.lines() {
            if let Some(rest) = line.trim_start().strip_prefix("//-") {
                if let Some(path) = current_path.take() {
                    files.insert(path, std::mem::take(&mut current_text));
                }
                let path = rest.trim();
                assert!(
                    path.starts_with('/'),
                    "fixture paths must be absolute: {path:?}"
                );
                current_path = Some(PathBuf::from(path));
                continue;
            }
            if current_path.is_none() {
                assert!(
                    line.trim().is_empty(),
                    "fixture text before the first `//-` marker: {line:?}"
                );
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            current_text.push_str(line.trim());
            current_text.push('\n');
        }
        if let Some(path) = current_path.take() {
            files.insert(path, current_text);
        }

        Self { files }
    }

    pub fn files(&self) -> impl Iterator<Item = (&Path, &str)> + '_ {
        self.files
            .iter()
            .map(|(path, text)| (path.as_path(), text.as_str()))
    }

    #[must_use]
    pub fn text(&self, path: &str) -> &str {
        self.files
            .get(Path::new(path))
            .unwrap_or_else(|| panic!("no fixture file {path}"))
    }

    /// An in-memory file system holding the fixture.
    #[must_use]
    pub fn memory_fs(&self) -> Arc<MemoryFs> {
        let fs = Arc::new(MemoryFs::new());
        for (path, text) in &self.files {
            fs.write(path.clone(), text);
        }
        fs
    }

    /// Writes the fixture below `root`, so `/p1/lib.src` lands at `root/p1/lib.src`.
    pub fn write_to(&self, root: &Path) {
        for (path, text) in &self.files {
            let relative = path.strip_prefix("/").unwrap_or(path);
            let target = root.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).unwrap_or_else(|err| {
                    panic!("failed to create fixture dir {}: {err}", parent.display())
                });
            }
            fs::write(&target, text).unwrap_or_else(|err| {
                panic!("failed to write fixture {}: {err}", target.display())
            });
        }
    }
}
