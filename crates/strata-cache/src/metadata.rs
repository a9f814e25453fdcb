use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_vfs::FileUri;

use crate::error::LoadError;

/// Build-system package identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(Arc<str>);

impl PackageId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackageId({})", self.0)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PackageId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// One package as reported by the build system.
///
/// Nodes are recorded under the directory they were queried for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageNode {
    pub id: PackageId,
    pub name: String,
    pub dir: PathBuf,
    pub files: Vec<FileUri>,
    /// Direct imports, in source order.
    pub imports: Vec<PackageId>,
    pub load_error: Option<LoadError>,
}

impl PackageNode {
    pub fn new(id: impl Into<PackageId>, dir: impl Into<PathBuf>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            dir: dir.into(),
            files: Vec::new(),
            imports: Vec::new(),
            load_error: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_files(mut self, files: impl IntoIterator<Item = FileUri>) -> Self {
        self.files = files.into_iter().collect();
        self
    }

    pub fn with_imports<I, P>(mut self, imports: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PackageId>,
    {
        self.imports = imports.into_iter().map(Into::into).collect();
        self
    }

    /// Placeholder for a directory whose query failed before any package was known there.
    fn stub(error: LoadError) -> Self {
        let name = error
            .dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id: PackageId::new(error.dir.to_string_lossy()),
            name,
            dir: error.dir.clone(),
            files: Vec::new(),
            imports: Vec::new(),
            load_error: Some(error),
        }
    }
}

/// Outcome of querying one directory.
pub(crate) type DirResult = (PathBuf, anyhow::Result<Vec<PackageNode>>);

/// Per-view package graph.
///
/// Forward edges live on the nodes. Reverse edges and the file index are derived from them:
/// each merge re-indexes only the nodes it changed.
#[derive(Debug, Clone, Default)]
pub struct MetadataGraph {
    nodes: im::OrdMap<PackageId, Arc<PackageNode>>,
    dirs: im::OrdMap<PathBuf, Vec<PackageId>>,
    imported_by: im::HashMap<PackageId, Vec<PackageId>>,
    ids_by_file: im::HashMap<FileUri, Vec<PackageId>>,
}

impl MetadataGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &PackageId) -> Option<&Arc<PackageNode>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &PackageId) -> bool {
        self.nodes.contains_key(id)
    }

    /// All packages in id order.
    pub fn packages(&self) -> impl Iterator<Item = &Arc<PackageNode>> + '_ {
        self.nodes.values()
    }

    pub fn package_ids(&self) -> impl Iterator<Item = &PackageId> + '_ {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Packages that directly import `id`, sorted.
    pub fn imported_by(&self, id: &PackageId) -> &[PackageId] {
        self.imported_by.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Packages containing `uri`, sorted.
    pub fn ids_for_file(&self, uri: &FileUri) -> &[PackageId] {
        self.ids_by_file.get(uri).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn packages_in_dir(&self, dir: &Path) -> &[PackageId] {
        self.dirs.get(dir).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Directories that contributed at least one node.
    pub fn dirs(&self) -> impl Iterator<Item = &Path> + '_ {
        self.dirs.keys().map(PathBuf::as_path)
    }

    /// `seeds` plus everything that transitively imports one of them.
    pub fn reverse_closure<'a>(
        &self,
        seeds: impl IntoIterator<Item = &'a PackageId>,
    ) -> BTreeSet<PackageId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<PackageId> = seeds.into_iter().cloned().collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            stack.extend(self.imported_by(&id).iter().cloned());
        }
        seen
    }

    /// Every package reachable through imports from `id`, excluding `id` itself unless it
    /// sits on a cycle.
    pub fn import_closure(&self, id: &PackageId) -> BTreeSet<PackageId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<PackageId> = match self.nodes.get(id) {
            Some(node) => node.imports.clone(),
            None => return seen,
        };
        while let Some(next) = stack.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&next) {
                stack.extend(node.imports.iter().cloned());
            }
        }
        seen
    }

    /// Merges fresh query results into a copy of this graph.
    ///
    /// A successful query replaces every node previously reported for its directory. A
    /// failed query keeps the previous nodes of that directory but marks them with the load
    /// error, or records a stub node when there were none. Returns the new graph and the ids
    /// whose node was added, removed or changed.
    pub(crate) fn with_dir_results(
        &self,
        results: Vec<DirResult>,
    ) -> (MetadataGraph, BTreeSet<PackageId>) {
        let mut nodes = self.nodes.clone();
        let mut dirs = self.dirs.clone();
        let mut touched: BTreeSet<PackageId> = BTreeSet::new();

        for (dir, result) in results {
            let previous = dirs.remove(&dir).unwrap_or_default();
            touched.extend(previous.iter().cloned());
            match result {
                Ok(reported) => {
                    for id in &previous {
                        nodes.remove(id);
                    }
                    let mut ids = Vec::with_capacity(reported.len());
                    for mut node in reported {
                        // A package moving between directories is owned by the newest report.
                        if let Some(old) = nodes.get(&node.id) {
                            if old.dir != dir {
                                if let Some(owner) = dirs.get_mut(&old.dir) {
                                    owner.retain(|id| id != &node.id);
                                }
                            }
                        }
                        node.dir = dir.clone();
                        touched.insert(node.id.clone());
                        ids.push(node.id.clone());
                        nodes.insert(node.id.clone(), Arc::new(node));
                    }
                    ids.sort();
                    ids.dedup();
                    if !ids.is_empty() {
                        dirs.insert(dir, ids);
                    }
                }
                Err(err) => {
                    let error = LoadError::from_anyhow(dir.clone(), &err);
                    tracing::warn!(
                        target: "strata.cache",
                        dir = %dir.display(),
                        error = %error.message,
                        "package query failed"
                    );
                    let mut ids = Vec::new();
                    for id in previous {
                        // Stubs are replaced, not stacked.
                        let Some(node) = nodes.get(&id).cloned() else {
                            continue;
                        };
                        if node.load_error.is_some() && *node.id.as_str() == *dir.to_string_lossy() {
                            nodes.remove(&id);
                            continue;
                        }
                        let mut node = (*node).clone();
                        node.load_error = Some(error.clone());
                        nodes.insert(id.clone(), Arc::new(node));
                        ids.push(id);
                    }
                    if ids.is_empty() {
                        let stub = PackageNode::stub(error);
                        touched.insert(stub.id.clone());
                        ids.push(stub.id.clone());
                        nodes.insert(stub.id.clone(), Arc::new(stub));
                    }
                    dirs.insert(dir, ids);
                }
            }
        }

        let changed: BTreeSet<PackageId> = touched
            .into_iter()
            .filter(|id| match (self.nodes.get(id), nodes.get(id)) {
                (Some(old), Some(new)) => !(Arc::ptr_eq(old, new) || old == new),
                (None, None) => false,
                _ => true,
            })
            .collect();

        let mut imported_by = self.imported_by.clone();
        let mut ids_by_file = self.ids_by_file.clone();
        for id in &changed {
            if let Some(old) = self.nodes.get(id) {
                for import in &old.imports {
                    unlink(&mut imported_by, import, id);
                }
                for file in &old.files {
                    unlink(&mut ids_by_file, file, id);
                }
            }
            if let Some(new) = nodes.get(id) {
                for import in &new.imports {
                    link(&mut imported_by, import, id);
                }
                for file in &new.files {
                    link(&mut ids_by_file, file, id);
                }
            }
        }

        let graph = MetadataGraph {
            nodes,
            dirs,
            imported_by,
            ids_by_file,
        };
        (graph, changed)
    }
}

/// Adds `id` to the sorted list under `key`.
fn link<K>(index: &mut im::HashMap<K, Vec<PackageId>>, key: &K, id: &PackageId)
where
    K: std::hash::Hash + Eq + Clone,
{
    let list = index.entry(key.clone()).or_default();
    if let Err(at) = list.binary_search(id) {
        list.insert(at, id.clone());
    }
}

/// Removes `id` from the sorted list under `key`, dropping the list once empty.
fn unlink<K>(index: &mut im::HashMap<K, Vec<PackageId>>, key: &K, id: &PackageId)
where
    K: std::hash::Hash + Eq + Clone,
{
    let Some(list) = index.get_mut(key) else {
        return;
    };
    if let Ok(at) = list.binary_search(id) {
        list.remove(at);
    }
    if list.is_empty() {
        index.remove(key);
    }
}

impl FromIterator<PackageNode> for MetadataGraph {
    /// Builds a graph from nodes grouped by their own `dir`.
    fn from_iter<T: IntoIterator<Item = PackageNode>>(iter: T) -> Self {
        let mut by_dir: BTreeMap<PathBuf, Vec<PackageNode>> = BTreeMap::new();
        for node in iter {
            by_dir.entry(node.dir.clone()).or_default().push(node);
        }
        let results = by_dir
            .into_iter()
            .map(|(dir, nodes)| (dir, Ok(nodes)))
            .collect();
        MetadataGraph::new().with_dir_results(results).0
    }
}
