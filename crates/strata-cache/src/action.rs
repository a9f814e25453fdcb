use std::fmt;
use std::sync::Arc;

use strata_memoize::Handle;
use strata_vfs::FileHandle;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{AnalysisError, CheckError};
use crate::facts::Facts;
use crate::metadata::{PackageId, PackageNode};
use crate::package::{read_sources, PackageHandle, PackageKey};
use crate::toolchain::{Analyzer, Diagnostic, Pass};

pub type ActionHandle = Handle<ActionKey, ActionResult, AnalysisError>;

/// Cache key of one analyzer's result on one package.
///
/// The package key already covers the import closure, so it also determines the facts the
/// action can see.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub package: PackageKey,
    pub analyzer: Arc<str>,
}

impl fmt::Debug for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionKey({}, {:?})", self.analyzer, self.package)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub analyzer: Arc<str>,
    pub package: PackageId,
    pub diagnostics: Vec<Diagnostic>,
    /// Facts exported on this package.
    pub exported: Facts,
    /// Facts exported on this package and on its transitive imports; what importers inherit.
    pub facts: Facts,
}

pub(crate) struct ActionInputs {
    pub analyzer: Arc<dyn Analyzer>,
    pub name: Arc<str>,
    pub node: Arc<PackageNode>,
    pub package: Arc<PackageHandle>,
    pub files: Vec<FileHandle>,
    /// Actions of the same analyzer on direct imports; empty unless the analyzer uses facts.
    pub deps: Vec<(PackageId, Arc<ActionHandle>)>,
}

pub(crate) async fn run_action(
    inputs: Arc<ActionInputs>,
    token: CancellationToken,
) -> Result<ActionResult, AnalysisError> {
    let node = &inputs.node;
    let checked = inputs
        .package
        .get(&token)
        .await
        .map_err(|err| AnalysisError::Package(CheckError::from_handle(&node.id, err)))?;

    let mut pending = JoinSet::new();
    for (index, (_, handle)) in inputs.deps.iter().enumerate() {
        let handle = Arc::clone(handle);
        let token = token.clone();
        pending.spawn(async move { (index, handle.get(&token).await) });
    }
    let mut outcomes = vec![None; inputs.deps.len()];
    while let Some(joined) = pending.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => return Err(AnalysisError::Cancelled),
        }
    }

    let mut imported = Facts::new();
    for ((dependency, _), outcome) in inputs.deps.iter().zip(outcomes) {
        match outcome {
            Some(Ok(result)) => imported.extend(&result.facts),
            Some(Err(err)) => {
                let err = AnalysisError::from_handle(&inputs.name, dependency, err);
                if err.is_cancelled() {
                    return Err(AnalysisError::Cancelled);
                }
                return Err(AnalysisError::Dependency {
                    analyzer: inputs.name.to_string(),
                    package: node.id.clone(),
                    dependency: dependency.clone(),
                    message: err.to_string(),
                });
            }
            None => return Err(AnalysisError::Cancelled),
        }
    }

    let files = read_sources(&inputs.files)?;
    if token.is_cancelled() {
        return Err(AnalysisError::Cancelled);
    }

    let mut pass = Pass {
        analyzer: Arc::clone(&inputs.name),
        package: Arc::clone(node),
        checked,
        files,
        imported,
        exported: Facts::new(),
        diagnostics: Vec::new(),
    };
    let analyzer = Arc::clone(&inputs.analyzer);
    let ran = tokio::task::spawn_blocking(move || {
        let result = analyzer.run(&mut pass);
        (pass, result)
    })
    .await;

    match ran {
        Ok((pass, Ok(()))) => {
            let mut facts = pass.exported.clone();
            facts.extend(&pass.imported);
            Ok(ActionResult {
                analyzer: pass.analyzer,
                package: node.id.clone(),
                diagnostics: pass.diagnostics,
                exported: pass.exported,
                facts,
            })
        }
        Ok((_, Err(err))) => match err.downcast::<crate::facts::FactsError>() {
            Ok(err) => Err(AnalysisError::Facts(err)),
            Err(err) => Err(AnalysisError::Failed {
                analyzer: inputs.name.to_string(),
                package: node.id.clone(),
                message: format!("{err:#}"),
            }),
        },
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(AnalysisError::Cancelled),
    }
}
