use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use parking_lot::{Condvar, Mutex};
use strata_cache::{
    Analyzer, BuildSystem, CancellationToken, CheckInput, CheckMode, Diagnostic, LoadRequest,
    Options, PackageId, PackageNode, Pass, Severity, Toolchain, TypeCheckOutput, TypeChecker,
};
use strata_vfs::{FileHandle, FileKind, FileUri};

pub const SOURCE_EXTENSION: &str = "src";
pub const MANIFEST_NAME: &str = "strata.toml";

/// How long a `slow` package waits for cancellation before giving up.
const SLOW_LIMIT: Duration = Duration::from_secs(10);

/// One directive line of a fake source file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line<'a> {
    Package(&'a str),
    Import(&'a str),
    Export(&'a str),
    Use(&'a str),
    Todo,
    Error,
    Panic,
    Slow,
    Wait,
    LoadError,
    Other,
}

fn parse_line(line: &str) -> Line<'_> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match word {
        "package" => Line::Package(rest),
        "import" => Line::Import(rest),
        "export" => Line::Export(rest),
        "use" => Line::Use(rest),
        "todo" => Line::Todo,
        "error" => Line::Error,
        "panic" => Line::Panic,
        "slow" => Line::Slow,
        "wait" => Line::Wait,
        "!load-error" => Line::LoadError,
        _ => Line::Other,
    }
}

fn lines(text: &str) -> impl Iterator<Item = Line<'_>> {
    text.lines().map(parse_line)
}

/// The lines a build system cares about.
fn header(text: &str) -> Vec<Line<'_>> {
    lines(text)
        .filter(|line| {
            matches!(
                line,
                Line::Package(_) | Line::Import(_) | Line::LoadError
            )
        })
        .collect()
}

/// A build system treating every directory with `.src` files as one package.
#[derive(Debug, Default)]
pub struct FakeBuildSystem {
    dependency_roots: Vec<PathBuf>,
    queries: Mutex<Vec<PathBuf>>,
}

impl FakeBuildSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a directory outside the workspace whose packages are loaded as dependencies.
    pub fn with_dependency_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.dependency_roots.push(root.into());
        self
    }

    /// Every directory queried so far, in order.
    pub fn queries(&self) -> Vec<PathBuf> {
        self.queries.lock().clone()
    }

    pub fn query_count(&self, dir: &str) -> usize {
        self.queries
            .lock()
            .iter()
            .filter(|queried| queried.as_path() == Path::new(dir))
            .count()
    }

    pub fn reset_queries(&self) {
        self.queries.lock().clear();
    }
}

impl BuildSystem for FakeBuildSystem {
    fn query(&self, request: &LoadRequest<'_>) -> anyhow::Result<Vec<PackageNode>> {
        self.queries.lock().push(request.dir.to_path_buf());

        let entries = match request.fs.read_dir(request.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to list {}", request.dir.display()))
            }
        };

        let mut files = Vec::new();
        let mut name: Option<String> = None;
        let mut imports: Vec<String> = Vec::new();
        for entry in entries {
            if entry.extension().and_then(|ext| ext.to_str()) != Some(SOURCE_EXTENSION)
                || request.fs.is_dir(&entry)
            {
                continue;
            }
            let bytes = request
                .fs
                .read_bytes(&entry)
                .with_context(|| format!("failed to read {}", entry.display()))?;
            let text = String::from_utf8_lossy(&bytes);
            for line in header(&text) {
                match line {
                    Line::Package(declared) => {
                        if let Some(existing) = &name {
                            if existing != declared {
                                bail!(
                                    "conflicting package names {existing} and {declared} in {}",
                                    request.dir.display()
                                );
                            }
                        }
                        name = Some(declared.to_string());
                    }
                    Line::Import(import) => {
                        if !imports.iter().any(|known| known == import) {
                            imports.push(import.to_string());
                        }
                    }
                    Line::LoadError => bail!("malformed package clause in {}", entry.display()),
                    _ => {}
                }
            }
            files.push(FileUri::from_path(&entry)?);
        }
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let name = match name {
            Some(name) => name,
            None => request
                .dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .context("package directory has no name")?,
        };
        Ok(vec![PackageNode::new(name.as_str(), request.dir)
            .with_files(files)
            .with_imports(imports)])
    }

    fn dependency_dirs(&self, _folder: &Path, _options: &Options) -> Vec<PathBuf> {
        self.dependency_roots.clone()
    }

    fn file_kind(&self, uri: &FileUri) -> FileKind {
        let path = uri.as_path();
        if path.file_name().and_then(|name| name.to_str()) == Some(MANIFEST_NAME) {
            FileKind::Manifest
        } else if path.extension().and_then(|ext| ext.to_str()) == Some(SOURCE_EXTENSION) {
            FileKind::Source
        } else {
            FileKind::Other
        }
    }

    fn invalidates_metadata(&self, old: &FileHandle, new: &FileHandle) -> bool {
        let (Ok(old), Ok(new)) = (old.read(), new.read()) else {
            return true;
        };
        header(&String::from_utf8_lossy(&old)) != header(&String::from_utf8_lossy(&new))
    }
}

/// A type checker over the fake source language.
///
/// Export data is the sorted list of exported symbols. `use` of a symbol no direct import
/// exports yields an error diagnostic. Records how often each package was checked.
///
/// A `wait` line blocks the check until [`FakeTypeChecker::release`] is called.
#[derive(Debug, Default)]
pub struct FakeTypeChecker {
    calls: Mutex<HashMap<PackageId, usize>>,
    released: Mutex<bool>,
    gate: Condvar,
}

impl FakeTypeChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls
            .lock()
            .get(&PackageId::new(id))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    /// Lets every current and future `wait` line proceed.
    pub fn release(&self) {
        *self.released.lock() = true;
        self.gate.notify_all();
    }

    fn wait_for_release(
        &self,
        package: &PackageId,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let started = Instant::now();
        let mut released = self.released.lock();
        while !*released {
            if cancel.is_cancelled() {
                bail!("cancelled");
            }
            if started.elapsed() > SLOW_LIMIT {
                bail!("waiting package {package} was never released");
            }
            self.gate.wait_for(&mut released, Duration::from_millis(5));
        }
        Ok(())
    }
}

/// Symbols listed in fake export data.
pub fn exported_symbols(export_data: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(export_data)
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

impl TypeChecker for FakeTypeChecker {
    fn check(
        &self,
        input: &CheckInput,
        cancel: &CancellationToken,
    ) -> anyhow::Result<TypeCheckOutput> {
        *self
            .calls
            .lock()
            .entry(input.package.id.clone())
            .or_default() += 1;

        let visible: BTreeSet<String> = input
            .deps
            .iter()
            .flat_map(|dep| exported_symbols(&dep.export_data))
            .collect();

        let mut exports = BTreeSet::new();
        let mut diagnostics = Vec::new();
        for file in &input.files {
            let text = file.text_lossy();
            for line in lines(&text) {
                match line {
                    Line::Export(symbol) => {
                        exports.insert(symbol.to_string());
                    }
                    Line::Use(symbol) if !visible.contains(symbol) => {
                        diagnostics.push(
                            Diagnostic::error(format!("undefined: {symbol}"))
                                .with_uri(file.uri.clone())
                                .with_source("typecheck"),
                        );
                    }
                    Line::Todo if input.mode == CheckMode::Full => {
                        diagnostics.push(
                            Diagnostic::warning("unfinished code")
                                .with_uri(file.uri.clone())
                                .with_source("typecheck"),
                        );
                    }
                    Line::Error => bail!("type error in {}", file.uri),
                    Line::Panic => panic!("type checker crashed on {}", file.uri),
                    Line::Slow => {
                        let started = Instant::now();
                        while !cancel.is_cancelled() {
                            if started.elapsed() > SLOW_LIMIT {
                                bail!("slow package {} was never cancelled", input.package.id);
                            }
                            std::thread::sleep(Duration::from_millis(5));
                        }
                        bail!("cancelled");
                    }
                    Line::Wait => self.wait_for_release(&input.package.id, cancel)?,
                    _ => {}
                }
            }
        }

        let mut export_data = Vec::new();
        for symbol in exports {
            export_data.extend_from_slice(symbol.as_bytes());
            export_data.push(b'\n');
        }
        Ok(TypeCheckOutput {
            export_data,
            diagnostics,
        })
    }
}

/// Fact kind exported by [`ExportsAnalyzer`].
pub const EXPORTS_FACT: &str = "exports";

/// Exports each package's symbols as a fact and reports, as info diagnostics, which
/// packages' facts were visible to it.
#[derive(Debug, Default)]
pub struct ExportsAnalyzer {
    runs: Mutex<Vec<PackageId>>,
}

impl ExportsAnalyzer {
    pub const NAME: &'static str = "exports";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self, id: &str) -> usize {
        let id = PackageId::new(id);
        self.runs.lock().iter().filter(|run| **run == id).count()
    }
}

impl Analyzer for ExportsAnalyzer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn uses_facts(&self) -> bool {
        true
    }

    fn run(&self, pass: &mut Pass) -> anyhow::Result<()> {
        self.runs.lock().push(pass.package().id.clone());

        for package in pass.imported_facts().packages() {
            let symbols: Vec<String> = pass.import_fact(&package, EXPORTS_FACT)?.unwrap_or_default();
            pass.report(Diagnostic::new(
                Severity::Info,
                format!("visible: {package} [{}]", symbols.join(",")),
            ));
        }

        let symbols = exported_symbols(&pass.checked().export_data);
        pass.export_fact(EXPORTS_FACT, &symbols)?;
        Ok(())
    }
}

/// Counts `todo` lines; does not use facts.
#[derive(Debug, Default)]
pub struct TodoAnalyzer;

impl TodoAnalyzer {
    pub const NAME: &'static str = "todos";
}

impl Analyzer for TodoAnalyzer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn run(&self, pass: &mut Pass) -> anyhow::Result<()> {
        let mut found = Vec::new();
        for file in pass.files() {
            let count = lines(&file.text_lossy())
                .filter(|line| *line == Line::Todo)
                .count();
            if count > 0 {
                found.push((file.uri.clone(), count));
            }
        }
        for (uri, count) in found {
            pass.report(Diagnostic::warning(format!("{count} todo(s)")).with_uri(uri));
        }
        Ok(())
    }
}

/// The fake collaborators wired together, with handles kept for assertions.
#[derive(Clone)]
pub struct FakeToolchain {
    pub build: Arc<FakeBuildSystem>,
    pub checker: Arc<FakeTypeChecker>,
    pub exports: Arc<ExportsAnalyzer>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::with_build(FakeBuildSystem::new())
    }

    pub fn with_build(build: FakeBuildSystem) -> Self {
        Self {
            build: Arc::new(build),
            checker: Arc::new(FakeTypeChecker::new()),
            exports: Arc::new(ExportsAnalyzer::new()),
        }
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain::new(self.build.clone(), self.checker.clone())
            .with_analyzer(self.exports.clone())
            .with_analyzer(Arc::new(TodoAnalyzer))
    }
}

impl Default for FakeToolchain {
    fn default() -> Self {
        Self::new()
    }
}
