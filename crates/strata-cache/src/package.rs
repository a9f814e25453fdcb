use std::fmt;
use std::sync::Arc;

use strata_memoize::Handle;
use strata_vfs::{FileHandle, Fingerprint};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::CheckError;
use crate::metadata::{PackageId, PackageNode};
use crate::toolchain::{CheckInput, Diagnostic, SourceFile, TypeChecker};

pub type PackageHandle = Handle<PackageKey, CheckedPackage, CheckError>;

/// How much of a package the type checker has to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckMode {
    /// Workspace packages: full bodies and diagnostics.
    Full,
    /// Packages outside the view folder: exported API only.
    Exported,
}

impl CheckMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckMode::Full => "full",
            CheckMode::Exported => "exported",
        }
    }
}

/// Content-derived cache key of a type-checked package.
///
/// The fingerprint covers the node itself, the hashes of its files, the build-affecting
/// options and the keys of its direct dependencies, so equal keys imply equal inputs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PackageKey {
    pub id: PackageId,
    pub mode: CheckMode,
    pub fingerprint: Fingerprint,
}

impl fmt::Debug for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PackageKey({}:{}:{})",
            self.id,
            self.mode.as_str(),
            self.fingerprint.short()
        )
    }
}

/// Result of type-checking one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedPackage {
    pub id: PackageId,
    pub mode: CheckMode,
    pub export_data: Vec<u8>,
    pub diagnostics: Vec<Diagnostic>,
    pub imports: Vec<PackageId>,
}

/// How a direct import is resolved when a package handle is built.
#[derive(Clone)]
pub(crate) enum DepSlot {
    Ready(Arc<PackageHandle>),
    /// The import is not part of the graph.
    Missing,
    /// The import leads back to a package whose handle is still being built.
    Cycle,
}

/// Inputs captured by a package handle's computation.
pub(crate) struct PackageInputs {
    pub node: Arc<PackageNode>,
    pub mode: CheckMode,
    pub files: Vec<FileHandle>,
    pub deps: Vec<(PackageId, DepSlot)>,
    pub checker: Arc<dyn TypeChecker>,
}

impl PackageInputs {
    pub(crate) fn key(&self, build_fingerprint: &[u8]) -> PackageKey {
        let node = &self.node;
        let mut parts: Vec<Vec<u8>> = vec![
            b"package".to_vec(),
            node.id.as_str().as_bytes().to_vec(),
            node.name.as_bytes().to_vec(),
            node.dir.to_string_lossy().as_bytes().to_vec(),
            self.mode.as_str().as_bytes().to_vec(),
            build_fingerprint.to_vec(),
        ];
        match &node.load_error {
            Some(err) => parts.push(format!("load-error:{}", err.message).into_bytes()),
            None => parts.push(Vec::new()),
        }
        for file in &self.files {
            parts.push(file.uri().as_path().to_string_lossy().as_bytes().to_vec());
            parts.push(file.hash().as_bytes().to_vec());
        }
        for (id, slot) in &self.deps {
            parts.push(id.as_str().as_bytes().to_vec());
            match slot {
                DepSlot::Ready(handle) => {
                    let key = handle.key();
                    parts.push(key.mode.as_str().as_bytes().to_vec());
                    parts.push(key.fingerprint.as_bytes().to_vec());
                }
                DepSlot::Missing => parts.push(b"missing".to_vec()),
                DepSlot::Cycle => parts.push(b"cycle".to_vec()),
            }
        }

        PackageKey {
            id: node.id.clone(),
            mode: self.mode,
            fingerprint: Fingerprint::from_parts(parts),
        }
    }
}

/// Reads the bytes of every handle, failing on the first unreadable file.
pub(crate) fn read_sources(files: &[FileHandle]) -> Result<Vec<SourceFile>, CheckError> {
    files
        .iter()
        .map(|file| {
            let text = file.read().map_err(|error| CheckError::Unreadable {
                uri: file.uri().clone(),
                error,
            })?;
            Ok(SourceFile {
                uri: file.uri().clone(),
                hash: file.hash().clone(),
                text,
            })
        })
        .collect()
}

/// Type-checks one package after resolving its imports.
///
/// Imports are awaited concurrently; when several fail, the first failing import in source
/// order is reported so the outcome does not depend on completion order.
pub(crate) async fn check_package(
    inputs: Arc<PackageInputs>,
    token: CancellationToken,
) -> Result<CheckedPackage, CheckError> {
    let node = &inputs.node;
    if let Some(error) = &node.load_error {
        return Err(CheckError::Load {
            package: node.id.clone(),
            error: error.clone(),
        });
    }

    let mut pending = JoinSet::new();
    for (index, (import, slot)) in inputs.deps.iter().enumerate() {
        match slot {
            DepSlot::Missing => {
                return Err(CheckError::UnresolvedImport {
                    package: node.id.clone(),
                    import: import.clone(),
                })
            }
            DepSlot::Cycle => {
                return Err(CheckError::ImportCycle {
                    package: node.id.clone(),
                    import: import.clone(),
                })
            }
            DepSlot::Ready(handle) => {
                let handle = Arc::clone(handle);
                let token = token.clone();
                pending.spawn(async move { (index, handle.get(&token).await) });
            }
        }
    }

    let mut outcomes = vec![None; inputs.deps.len()];
    while let Some(joined) = pending.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => return Err(CheckError::Cancelled),
        }
    }

    let mut deps = Vec::with_capacity(outcomes.len());
    for ((import, _), outcome) in inputs.deps.iter().zip(outcomes) {
        match outcome {
            Some(Ok(checked)) => deps.push(checked),
            Some(Err(err)) => {
                return Err(CheckError::from_handle(import, err).for_importer(&node.id, import))
            }
            None => return Err(CheckError::Cancelled),
        }
    }

    let files = read_sources(&inputs.files)?;
    if token.is_cancelled() {
        return Err(CheckError::Cancelled);
    }

    let input = CheckInput {
        package: Arc::clone(node),
        mode: inputs.mode,
        files,
        deps,
    };
    let checker = Arc::clone(&inputs.checker);
    let check_token = token.clone();
    let output = tokio::task::spawn_blocking(move || checker.check(&input, &check_token)).await;
    match output {
        Ok(Ok(output)) => Ok(CheckedPackage {
            id: node.id.clone(),
            mode: inputs.mode,
            export_data: output.export_data,
            diagnostics: output.diagnostics,
            imports: node.imports.clone(),
        }),
        Ok(Err(_)) if token.is_cancelled() => Err(CheckError::Cancelled),
        Ok(Err(err)) => Err(CheckError::TypeCheck {
            package: node.id.clone(),
            message: format!("{err:#}"),
        }),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(CheckError::Cancelled),
    }
}
