//! Narrow interfaces to the build system, the type checker and analyzers.
//!
//! The engine never inspects source text itself. Everything language specific is reached
//! through these traits, which makes them the seams tests plug fakes into.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_config::Options;
use strata_vfs::{FileHandle, FileKind, FileSystem, FileUri, Fingerprint};
use tokio_util::sync::CancellationToken;

use crate::facts::{Facts, FactsError};
use crate::metadata::{PackageId, PackageNode};
use crate::package::{CheckMode, CheckedPackage};

/// One build-system query: "which packages live in `dir`?"
pub struct LoadRequest<'a> {
    pub dir: &'a Path,
    pub folder: &'a Path,
    /// Overlay-aware view of the file system; unsaved buffers count as directory members.
    pub fs: &'a dyn FileSystem,
    pub options: &'a Options,
}

pub trait BuildSystem: Send + Sync {
    /// Returns the package nodes rooted in `request.dir`.
    ///
    /// Nodes must not carry a load error; failures are reported through the `Err` variant and
    /// recorded on the graph by the engine.
    fn query(&self, request: &LoadRequest<'_>) -> anyhow::Result<Vec<PackageNode>>;

    /// Directories outside the view folder whose packages the workspace depends on, such as
    /// a vendored standard library. They are loaded with the view and checked in
    /// [`CheckMode::Exported`] mode.
    fn dependency_dirs(&self, _folder: &Path, _options: &Options) -> Vec<PathBuf> {
        Vec::new()
    }

    fn file_kind(&self, _uri: &FileUri) -> FileKind {
        FileKind::Source
    }

    /// Whether replacing `old` with `new` can change the package structure of the directory
    /// (for example an edited import list).
    fn invalidates_metadata(&self, _old: &FileHandle, _new: &FileHandle) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    pub uri: Option<FileUri>,
    pub severity: Severity,
    pub message: String,
    /// Producer of the diagnostic: `"typecheck"` or an analyzer name.
    pub source: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            uri: None,
            severity,
            message: message.into(),
            source: String::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn with_uri(mut self, uri: FileUri) -> Self {
        self.uri = Some(uri);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Bytes of one package file as seen by a snapshot.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub uri: FileUri,
    pub hash: Fingerprint,
    pub text: Arc<[u8]>,
}

impl SourceFile {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.text).into_owned()
    }
}

/// Everything a type checker may look at for one package.
#[derive(Debug, Clone)]
pub struct CheckInput {
    pub package: Arc<PackageNode>,
    pub mode: CheckMode,
    pub files: Vec<SourceFile>,
    /// Results of the direct imports, in import order.
    pub deps: Vec<Arc<CheckedPackage>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeCheckOutput {
    /// Opaque summary of the package API that dependents consume.
    pub export_data: Vec<u8>,
    pub diagnostics: Vec<Diagnostic>,
}

/// A pure type-checking function.
///
/// Runs on the blocking thread pool. Implementations should poll `cancel` between units of
/// work; an error returned after cancellation is reported as cancellation.
pub trait TypeChecker: Send + Sync {
    fn check(
        &self,
        input: &CheckInput,
        cancel: &CancellationToken,
    ) -> anyhow::Result<TypeCheckOutput>;
}

/// A pure analysis pass over one type-checked package.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this analyzer reads facts exported on imported packages. Analyzers that do
    /// not use facts do not wait on the results of their imports.
    fn uses_facts(&self) -> bool {
        false
    }

    fn run(&self, pass: &mut Pass) -> anyhow::Result<()>;
}

/// Inputs and outputs of one analyzer run.
pub struct Pass {
    pub(crate) analyzer: Arc<str>,
    pub(crate) package: Arc<PackageNode>,
    pub(crate) checked: Arc<CheckedPackage>,
    pub(crate) files: Vec<SourceFile>,
    pub(crate) imported: Facts,
    pub(crate) exported: Facts,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

impl Pass {
    pub fn analyzer(&self) -> &str {
        &self.analyzer
    }

    pub fn package(&self) -> &PackageNode {
        &self.package
    }

    pub fn checked(&self) -> &CheckedPackage {
        &self.checked
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    /// Reads a fact exported by this analyzer on one of the package's (transitive) imports.
    pub fn import_fact<T: serde::de::DeserializeOwned>(
        &self,
        package: &PackageId,
        kind: &str,
    ) -> Result<Option<T>, FactsError> {
        self.imported.get(package, kind)
    }

    /// All facts visible to this run, from every transitive import.
    pub fn imported_facts(&self) -> &Facts {
        &self.imported
    }

    /// Exports a fact on the package being analyzed. A later export of the same kind
    /// replaces the earlier one.
    pub fn export_fact<T: serde::Serialize>(
        &mut self,
        kind: &str,
        value: &T,
    ) -> Result<(), FactsError> {
        self.exported.insert(&self.package.id, kind, value)
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        let diagnostic = if diagnostic.source.is_empty() {
            diagnostic.with_source(self.analyzer.to_string())
        } else {
            diagnostic
        };
        self.diagnostics.push(diagnostic);
    }
}

impl fmt::Debug for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pass")
            .field("analyzer", &self.analyzer)
            .field("package", &self.package.id)
            .field("files", &self.files.len())
            .field("imported", &self.imported.len())
            .finish_non_exhaustive()
    }
}

/// The external collaborators a session computes with.
#[derive(Clone)]
pub struct Toolchain {
    pub build: Arc<dyn BuildSystem>,
    pub checker: Arc<dyn TypeChecker>,
    pub analyzers: Vec<Arc<dyn Analyzer>>,
}

impl Toolchain {
    pub fn new(build: Arc<dyn BuildSystem>, checker: Arc<dyn TypeChecker>) -> Self {
        Self {
            build,
            checker,
            analyzers: Vec::new(),
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    pub fn analyzer(&self, name: &str) -> Option<&Arc<dyn Analyzer>> {
        self.analyzers.iter().find(|analyzer| analyzer.name() == name)
    }

    /// Analyzers not disabled by `options`, in registration order.
    pub fn enabled_analyzers<'a>(
        &'a self,
        options: &'a Options,
    ) -> impl Iterator<Item = &'a Arc<dyn Analyzer>> + 'a {
        self.analyzers
            .iter()
            .filter(move |analyzer| options.analyzer_enabled(analyzer.name()))
    }
}

impl fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let analyzers: Vec<&str> = self.analyzers.iter().map(|a| a.name()).collect();
        f.debug_struct("Toolchain")
            .field("analyzers", &analyzers)
            .finish_non_exhaustive()
    }
}
