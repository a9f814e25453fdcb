use std::path::PathBuf;

use strata_memoize::HandleError;
use strata_vfs::{FileUri, VfsError};
use thiserror::Error;

use crate::facts::FactsError;
use crate::metadata::PackageId;

/// A build-system query failed for one directory.
///
/// Recorded on the affected package nodes (or on a stub node when the directory had none)
/// instead of aborting the rest of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to load packages in {dir}: {message}")]
pub struct LoadError {
    pub dir: PathBuf,
    pub message: String,
}

impl LoadError {
    pub(crate) fn from_anyhow(dir: PathBuf, err: &anyhow::Error) -> Self {
        Self {
            dir,
            message: format!("{err:#}"),
        }
    }
}

/// Why a package could not be type-checked.
///
/// Cached on the package handle like a success, so the type is `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("unknown package {package}")]
    UnknownPackage { package: PackageId },

    #[error("package {package} could not be loaded: {error}")]
    Load { package: PackageId, error: LoadError },

    #[error("package {package} depends on {upstream}, which could not be loaded")]
    UpstreamLoad {
        package: PackageId,
        upstream: PackageId,
    },

    #[error("package {package} imports {import}, which is not part of the workspace graph")]
    UnresolvedImport { package: PackageId, import: PackageId },

    #[error("import cycle through {package} and {import}")]
    ImportCycle { package: PackageId, import: PackageId },

    #[error("dependency {dependency} of {package} failed to type-check: {message}")]
    Dependency {
        package: PackageId,
        dependency: PackageId,
        message: String,
    },

    #[error("failed to read {uri}: {error}")]
    Unreadable { uri: FileUri, error: VfsError },

    #[error("type checking {package} failed: {message}")]
    TypeCheck { package: PackageId, message: String },

    #[error("type checking {package} panicked: {message}")]
    Panicked { package: PackageId, message: String },

    #[error("type checking cancelled")]
    Cancelled,
}

impl CheckError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CheckError::Cancelled)
    }

    /// Converts the outcome of waiting on a package handle into the error seen by `package`.
    pub(crate) fn from_handle(package: &PackageId, err: HandleError<CheckError>) -> Self {
        match err {
            HandleError::Cancelled => CheckError::Cancelled,
            HandleError::Failed(err) => err,
            HandleError::Panicked(message) => CheckError::Panicked {
                package: package.clone(),
                message: message.to_string(),
            },
        }
    }

    /// The error reported by `package` when its import `dependency` failed with `self`.
    pub(crate) fn for_importer(self, package: &PackageId, dependency: &PackageId) -> Self {
        match self {
            CheckError::Cancelled => CheckError::Cancelled,
            CheckError::Load { package: upstream, .. }
            | CheckError::UpstreamLoad { upstream, .. } => CheckError::UpstreamLoad {
                package: package.clone(),
                upstream,
            },
            other => CheckError::Dependency {
                package: package.clone(),
                dependency: dependency.clone(),
                message: other.to_string(),
            },
        }
    }
}

/// Why an analyzer produced no result for a package.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("analyzer {analyzer} is not enabled for this view")]
    UnknownAnalyzer { analyzer: String },

    #[error(transparent)]
    Package(#[from] CheckError),

    #[error("analyzer {analyzer} failed on {package}: {message}")]
    Failed {
        analyzer: String,
        package: PackageId,
        message: String,
    },

    #[error("analyzer {analyzer} on {package} panicked: {message}")]
    Panicked {
        analyzer: String,
        package: PackageId,
        message: String,
    },

    #[error("analyzer {analyzer} failed on {dependency}, imported by {package}: {message}")]
    Dependency {
        analyzer: String,
        package: PackageId,
        dependency: PackageId,
        message: String,
    },

    #[error(transparent)]
    Facts(#[from] FactsError),

    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AnalysisError::Cancelled | AnalysisError::Package(CheckError::Cancelled)
        )
    }

    pub(crate) fn from_handle(
        analyzer: &str,
        package: &PackageId,
        err: HandleError<AnalysisError>,
    ) -> Self {
        match err {
            HandleError::Cancelled => AnalysisError::Cancelled,
            HandleError::Failed(err) => err,
            HandleError::Panicked(message) => AnalysisError::Panicked {
                analyzer: analyzer.to_string(),
                package: package.clone(),
                message: message.to_string(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no views in the session")]
    NoViews,

    #[error("view {name} for {folder} not found")]
    ViewNotFound { name: String, folder: PathBuf },

    #[error("view {name} has been shut down")]
    ViewShutdown { name: String },

    #[error("the session owning view {name} has been dropped")]
    SessionClosed { name: String },

    #[error("view folder {folder} is not an absolute path")]
    RelativeFolder { folder: PathBuf },

    #[error(transparent)]
    Vfs(#[from] VfsError),
}
