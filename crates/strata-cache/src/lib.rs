//! Incremental workspace engine.
//!
//! A [`Session`] owns the open [`View`]s (one per workspace folder) and the editor overlays.
//! Every change produces a new immutable [`Snapshot`] per affected view; a snapshot holds the
//! [`MetadataGraph`] plus memoized package and analyzer handles, and shares every handle the
//! change did not invalidate with its predecessor.
//!
//! Computation is delegated to the collaborators in [`Toolchain`]: a [`BuildSystem`] that
//! reports packages per directory, a [`TypeChecker`] and a set of [`Analyzer`]s.

mod action;
mod cache;
mod error;
mod facts;
mod metadata;
mod package;
mod session;
mod snapshot;
mod toolchain;
mod view;

pub use action::{ActionHandle, ActionKey, ActionResult};
pub use cache::Cache;
pub use error::{AnalysisError, CheckError, LoadError, SessionError};
pub use facts::{Facts, FactsError};
pub use metadata::{MetadataGraph, PackageId, PackageNode};
pub use package::{CheckMode, CheckedPackage, PackageHandle, PackageKey};
pub use session::Session;
pub use snapshot::Snapshot;
pub use toolchain::{
    Analyzer, BuildSystem, CheckInput, Diagnostic, LoadRequest, Pass, Severity, SourceFile,
    Toolchain, TypeCheckOutput, TypeChecker,
};
pub use view::{View, ViewState};

pub use strata_config::Options;
pub use strata_memoize::CancellationToken;
pub use strata_vfs::{FileAction, FileHandle, FileKind, FileModification, FileUri};
